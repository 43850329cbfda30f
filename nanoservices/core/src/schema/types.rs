use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of table. Only time-series tables are eligible for scheduled refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Normal,
    TimeSeries,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Normal => "normal",
            TableKind::TimeSeries => "time_series",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(TableKind::Normal),
            "time_series" => Ok(TableKind::TimeSeries),
            other => Err(format!("unknown table kind '{other}'")),
        }
    }
}

/// Coercion class derived from a declared SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Text,
    Json,
}

impl ColumnType {
    /// Classify a declared SQL type by its leading token, e.g. `DOUBLE PRECISION`
    /// is floating-like and `VARCHAR(50)` is text.
    pub fn classify(sql_type: &str) -> Self {
        let head: String = sql_type
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_ascii_uppercase();

        match head.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "INT2" | "INT4" | "INT8"
            | "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" => ColumnType::Integer,
            "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "REAL" | "NUMERIC" | "DECIMAL" => {
                ColumnType::Float
            }
            "BOOL" | "BOOLEAN" => ColumnType::Boolean,
            "DATE" => ColumnType::Date,
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => ColumnType::Timestamp,
            "JSON" | "JSONB" => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

/// A column as declared at table creation: a name and a free-form SQL type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self { name: name.into(), sql_type: sql_type.into() }
    }

    pub fn class(&self) -> ColumnType {
        ColumnType::classify(&self.sql_type)
    }

    /// `NOT NULL` columns the database will not fill in on its own.
    pub fn is_required(&self) -> bool {
        let upper = self.sql_type.to_ascii_uppercase();
        upper.contains("NOT NULL")
            && !upper.contains("PRIMARY KEY")
            && !upper.contains("SERIAL")
            && !upper.contains("DEFAULT")
    }
}

/// Leaf path -> column name. Keyed by path; each column may be targeted once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping(BTreeMap<String, String>);

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, column: impl Into<String>) {
        self.0.insert(path.into(), column.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn column_for(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: Into<String>, C: Into<String>> FromIterator<(P, C)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(p, c)| (p.into(), c.into())).collect())
    }
}

/// Everything the refresh pipeline needs to know about one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Seconds between scheduled refreshes.
    #[serde(default)]
    pub refresh_interval: Option<u64>,
    #[serde(default)]
    pub mapping: Mapping,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Time-series table with both a source and an interval.
    pub fn is_schedulable(&self) -> bool {
        self.kind == TableKind::TimeSeries
            && self.source_url.is_some()
            && matches!(self.refresh_interval, Some(secs) if secs > 0)
    }
}

/// Partial update of a table's refresh configuration.
///
/// The outer `Option` means "leave unchanged"; `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub source_url: Option<Option<String>>,
    pub refresh_interval: Option<Option<u64>>,
    pub mapping: Option<Mapping>,
}

impl ConfigUpdate {
    pub fn source_url(mut self, url: Option<String>) -> Self {
        self.source_url = Some(url);
        self
    }

    pub fn refresh_interval(mut self, secs: Option<u64>) -> Self {
        self.refresh_interval = Some(secs);
        self
    }

    pub fn mapping(mut self, mapping: Mapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub(crate) fn apply(&self, def: &mut TableDefinition) {
        if let Some(url) = &self.source_url {
            def.source_url = url.clone();
        }
        if let Some(interval) = self.refresh_interval {
            def.refresh_interval = interval;
        }
        if let Some(mapping) = &self.mapping {
            def.mapping = mapping.clone();
        }
    }
}

/// Names that are safe to splice into quoted SQL identifiers.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Declared column types are spliced into DDL, so keep them to a plain alphabet.
pub fn is_sql_type(sql_type: &str) -> bool {
    !sql_type.trim().is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','))
}
