pub mod error;

use chrono::{NaiveDate, NaiveDateTime};
use error::Error;
use serde::Serialize;

pub type SchemaflowResult<T> = Result<T, Error>;

/// Canonical text layout for stored timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current UTC time in [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    chrono::Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

/// A value that has been coerced to a column's declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value the way it is written to text-affine storage.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Boolean(b) => Some(b.to_string()),
            SqlValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            SqlValue::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Json(v) => Some(v.to_string()),
        }
    }
}

/// One typed row, columns in table order. Columns the mapping left unset are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row(Vec<(String, SqlValue)>);

impl Row {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.0.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, SqlValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lookup_by_column() {
        let mut row = Row::new();
        row.push("ts", SqlValue::Text("a".into()));
        row.push("temp", SqlValue::Float(5.2));

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("temp"), Some(&SqlValue::Float(5.2)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["ts", "temp"]);
    }

    #[test]
    fn timestamps_render_with_seconds() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(SqlValue::Timestamp(ts).to_text().as_deref(), Some("2024-01-01T00:00:00"));
        assert_eq!(SqlValue::Null.to_text(), None);
    }
}
