use std::time::Duration;

use crate::schema::registry::{validate_definition, RegistryError};
use crate::schema::types::{ColumnDef, Mapping, TableDefinition, TableKind};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("table name is required")]
    NoName,
    #[error("at least one column is required")]
    NoColumns,
    #[error("refresh interval must be whole seconds, got {0:?}")]
    FractionalInterval(Duration),
    #[error("invalid table definition: {0}")]
    Invalid(#[from] RegistryError),
}

/// Fluent construction of a [`TableDefinition`], validated on `build`.
///
/// ```
/// use std::time::Duration;
/// use schemaflow_core::builder::TableBuilder;
///
/// let def = TableBuilder::new("weather_data")
///     .time_series()
///     .column("ts", "TIMESTAMP")
///     .column("temp", "FLOAT")
///     .source_url("https://api.open-meteo.com/v1/forecast?latitude=52.52&longitude=13.41&hourly=temperature_2m")
///     .refresh_every(Duration::from_secs(3600))
///     .map("hourly.time", "ts")
///     .map("hourly.temperature_2m", "temp")
///     .build()
///     .unwrap();
/// assert!(def.is_schedulable());
/// ```
pub struct TableBuilder {
    name: String,
    kind: TableKind,
    columns: Vec<ColumnDef>,
    source_url: Option<String>,
    refresh_interval: Option<Duration>,
    mapping: Mapping,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Normal,
            columns: Vec::new(),
            source_url: None,
            refresh_interval: None,
            mapping: Mapping::new(),
        }
    }

    pub fn kind(mut self, kind: TableKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn time_series(self) -> Self {
        self.kind(TableKind::TimeSeries)
    }

    pub fn column(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.columns.push(ColumnDef::new(name, sql_type));
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn refresh_every(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Map a flattened source path onto a column.
    pub fn map(mut self, path: impl Into<String>, column: impl Into<String>) -> Self {
        self.mapping.insert(path, column);
        self
    }

    pub fn mapping(mut self, mapping: Mapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn build(self) -> Result<TableDefinition, BuildError> {
        if self.name.is_empty() {
            return Err(BuildError::NoName);
        }
        if self.columns.is_empty() {
            return Err(BuildError::NoColumns);
        }
        let refresh_interval = match self.refresh_interval {
            Some(interval) if interval.subsec_nanos() != 0 => {
                return Err(BuildError::FractionalInterval(interval))
            }
            other => other.map(|i| i.as_secs()),
        };

        let def = TableDefinition {
            name: self.name,
            kind: self.kind,
            columns: self.columns,
            source_url: self.source_url,
            refresh_interval,
            mapping: self.mapping,
        };
        validate_definition(&def)?;
        Ok(def)
    }
}
