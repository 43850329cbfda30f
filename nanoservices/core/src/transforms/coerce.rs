//! Type coercion from raw JSON values to declared column types, and the row
//! builder that applies it to staged candidates.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use schemaflow_utils::{Row, SqlValue};

use crate::mapping::resolver::RowCandidate;
use crate::schema::types::{ColumnDef, ColumnType};

/// A row that could not be built, and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("column {column}: {reason}")]
pub struct RowError {
    pub column: String,
    pub reason: String,
}

impl RowError {
    fn new(column: &str, reason: impl Into<String>) -> Self {
        Self { column: column.to_string(), reason: reason.into() }
    }
}

/// What to do with a batch when some of its rows fail coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop failing rows, keep going and report how many were dropped.
    #[default]
    SkipRow,
    /// The first failing row fails the whole batch.
    AbortBatch,
}

/// Rows that survived coercion plus what happened to the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub rows: Vec<Row>,
    /// Errors of skipped rows, in source order, keyed by candidate index.
    pub errors: Vec<(usize, RowError)>,
    /// Set when `AbortBatch` stopped at a row error.
    pub aborted: bool,
}

impl BatchOutcome {
    pub fn skipped(&self) -> usize {
        self.errors.len()
    }
}

/// Build a typed row from a candidate, converting each staged value to its
/// column's declared type. Columns not in the table are ignored; the row keeps
/// the table's column order.
pub fn coerce(candidate: &RowCandidate, columns: &[ColumnDef]) -> Result<Row, RowError> {
    let mut row = Row::new();
    for column in columns {
        match candidate.get(&column.name) {
            Some(raw) => {
                let value = coerce_value(column.class(), raw)
                    .map_err(|reason| RowError::new(&column.name, reason))?;
                if value.is_null() && column.is_required() {
                    return Err(RowError::new(&column.name, "required column is null"));
                }
                row.push(column.name.clone(), value);
            }
            None if column.is_required() => {
                return Err(RowError::new(&column.name, "required column is missing"));
            }
            None => {}
        }
    }
    Ok(row)
}

/// Coerce every candidate, applying `policy` to failures.
pub fn coerce_batch(
    candidates: &[RowCandidate],
    columns: &[ColumnDef],
    policy: FailurePolicy,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for (idx, candidate) in candidates.iter().enumerate() {
        match coerce(candidate, columns) {
            Ok(row) => outcome.rows.push(row),
            Err(err) => {
                outcome.errors.push((idx, err));
                if policy == FailurePolicy::AbortBatch {
                    outcome.aborted = true;
                    break;
                }
            }
        }
    }
    outcome
}

/// Convert one raw value to the given type class.
pub fn coerce_value(class: ColumnType, raw: &Value) -> Result<SqlValue, String> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    match class {
        ColumnType::Integer => to_integer(raw).map(SqlValue::Integer),
        ColumnType::Float => to_float(raw).map(SqlValue::Float),
        ColumnType::Boolean => to_boolean(raw).map(SqlValue::Boolean),
        ColumnType::Date => to_date(raw).map(SqlValue::Date),
        ColumnType::Timestamp => to_timestamp(raw).map(SqlValue::Timestamp),
        ColumnType::Text => Ok(SqlValue::Text(to_text(raw))),
        ColumnType::Json => to_json(raw).map(SqlValue::Json),
    }
}

fn to_integer(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(truncate))
            .ok_or_else(|| format!("{n} does not fit a 64-bit integer")),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
                .ok_or_else(|| format!("'{s}' is not numeric"))
        }
        other => Err(format!("expected a number, got {}", kind(other))),
    }
}

fn truncate(f: f64) -> Option<i64> {
    (f.is_finite() && f.trunc() >= i64::MIN as f64 && f.trunc() < i64::MAX as f64)
        .then(|| f.trunc() as i64)
}

fn to_float(raw: &Value) -> Result<f64, String> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(format!("expected a number, got {}", kind(other))),
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("'{}' is not numeric", to_text(raw)))
}

fn to_boolean(raw: &Value) -> Result<bool, String> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Ok(true),
            Some(f) if f == 0.0 => Ok(false),
            _ => Err(format!("{n} is not a boolean (expected 0 or 1)")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(format!("unrecognized boolean '{s}'")),
        },
        other => Err(format!("expected a boolean, got {}", kind(other))),
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s.trim(), fmt).ok())
}

fn to_date(raw: &Value) -> Result<NaiveDate, String> {
    match raw {
        Value::String(s) => parse_date(s)
            .or_else(|| parse_datetime(s).map(|dt| dt.date()))
            .ok_or_else(|| format!("unparsable date '{s}'")),
        other => Err(format!("expected a date string, got {}", kind(other))),
    }
}

fn to_timestamp(raw: &Value) -> Result<NaiveDateTime, String> {
    match raw {
        Value::String(s) => parse_datetime(s).ok_or_else(|| {
            if parse_date(s).is_some() {
                format!("timestamp requires a date and a time, got '{s}'")
            } else {
                format!("unparsable timestamp '{s}'")
            }
        }),
        Value::Object(map) => match (map.get("date"), map.get("time")) {
            (Some(date), Some(time)) => combine(date, time),
            _ => Err("timestamp object needs 'date' and 'time' fields".to_string()),
        },
        Value::Array(parts) if parts.len() == 2 => combine(&parts[0], &parts[1]),
        other => Err(format!("expected a timestamp, got {}", kind(other))),
    }
}

fn combine(date: &Value, time: &Value) -> Result<NaiveDateTime, String> {
    let (Value::String(d), Value::String(t)) = (date, time) else {
        return Err("date and time parts must be strings".to_string());
    };
    let date = parse_date(d).ok_or_else(|| format!("unparsable date '{d}'"))?;
    let time = parse_time(t).ok_or_else(|| format!("unparsable time '{t}'"))?;
    Ok(date.and_time(time))
}

fn to_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_json(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::String(s) => serde_json::from_str(s).map_err(|e| format!("malformed JSON text: {e}")),
        other => Ok(other.clone()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn integers_from_numbers_and_strings() {
        assert_eq!(coerce_value(ColumnType::Integer, &json!(42)), Ok(SqlValue::Integer(42)));
        assert_eq!(coerce_value(ColumnType::Integer, &json!(" 17 ")), Ok(SqlValue::Integer(17)));
        assert_eq!(coerce_value(ColumnType::Integer, &json!(9.9)), Ok(SqlValue::Integer(9)));
        assert_eq!(coerce_value(ColumnType::Integer, &json!("-3.5")), Ok(SqlValue::Integer(-3)));
        assert!(coerce_value(ColumnType::Integer, &json!("abc")).is_err());
        assert!(coerce_value(ColumnType::Integer, &json!(true)).is_err());
    }

    #[test]
    fn floats_reject_non_numeric() {
        assert_eq!(coerce_value(ColumnType::Float, &json!(5.2)), Ok(SqlValue::Float(5.2)));
        assert_eq!(coerce_value(ColumnType::Float, &json!("1e3")), Ok(SqlValue::Float(1000.0)));
        assert!(coerce_value(ColumnType::Float, &json!("warm")).is_err());
        assert!(coerce_value(ColumnType::Float, &json!("NaN")).is_err());
        assert!(coerce_value(ColumnType::Float, &json!([1.0])).is_err());
    }

    #[test]
    fn booleans_accept_tokens_and_bits() {
        for raw in [json!(true), json!("TRUE"), json!("t"), json!("1"), json!(1)] {
            assert_eq!(coerce_value(ColumnType::Boolean, &raw), Ok(SqlValue::Boolean(true)), "{raw}");
        }
        for raw in [json!(false), json!("false"), json!("F"), json!("0"), json!(0)] {
            assert_eq!(coerce_value(ColumnType::Boolean, &raw), Ok(SqlValue::Boolean(false)), "{raw}");
        }
        assert!(coerce_value(ColumnType::Boolean, &json!("yes")).is_err());
        assert!(coerce_value(ColumnType::Boolean, &json!(2)).is_err());
    }

    #[test]
    fn timestamps_in_common_layouts() {
        let midnight = ts("2024-01-01 00:00:00");
        for raw in [
            json!("2024-01-01T00:00"),
            json!("2024-01-01T00:00:00"),
            json!("2024-01-01 00:00:00"),
            json!("2024-01-01T01:00:00+01:00"),
            json!("Mon, 01 Jan 2024 00:00:00 +0000"),
            json!({"date": "2024-01-01", "time": "00:00"}),
            json!(["2024-01-01", "00:00:00"]),
        ] {
            assert_eq!(coerce_value(ColumnType::Timestamp, &raw), Ok(SqlValue::Timestamp(midnight)), "{raw}");
        }
    }

    #[test]
    fn timestamps_need_a_time_part() {
        let err = coerce_value(ColumnType::Timestamp, &json!("2024-01-01")).unwrap_err();
        assert!(err.contains("requires a date and a time"));
        assert!(coerce_value(ColumnType::Timestamp, &json!("bad-date")).is_err());
        assert!(coerce_value(ColumnType::Timestamp, &json!(1704067200)).is_err());
    }

    #[test]
    fn dates_take_the_date_part() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(coerce_value(ColumnType::Date, &json!("2024-03-09")), Ok(SqlValue::Date(day)));
        assert_eq!(coerce_value(ColumnType::Date, &json!("2024-03-09T12:30:00")), Ok(SqlValue::Date(day)));
        assert!(coerce_value(ColumnType::Date, &json!("09/03/2024")).is_err());
    }

    #[test]
    fn text_never_fails() {
        assert_eq!(coerce_value(ColumnType::Text, &json!("x")), Ok(SqlValue::Text("x".into())));
        assert_eq!(coerce_value(ColumnType::Text, &json!(1.5)), Ok(SqlValue::Text("1.5".into())));
        assert_eq!(coerce_value(ColumnType::Text, &json!([1, 2])), Ok(SqlValue::Text("[1,2]".into())));
    }

    #[test]
    fn json_keeps_structures_and_parses_text() {
        assert_eq!(coerce_value(ColumnType::Json, &json!({"a": 1})), Ok(SqlValue::Json(json!({"a": 1}))));
        assert_eq!(coerce_value(ColumnType::Json, &json!("[1,2]")), Ok(SqlValue::Json(json!([1, 2]))));
        assert!(coerce_value(ColumnType::Json, &json!("{broken")).is_err());
    }

    #[test]
    fn null_is_null_for_every_class() {
        for class in [ColumnType::Integer, ColumnType::Timestamp, ColumnType::Json, ColumnType::Text] {
            assert_eq!(coerce_value(class, &Value::Null), Ok(SqlValue::Null));
        }
    }

    #[test]
    fn coerced_values_survive_a_second_pass() {
        let cases = [
            (ColumnType::Boolean, json!("true")),
            (ColumnType::Integer, json!("12")),
            (ColumnType::Float, json!("5.25")),
            (ColumnType::Timestamp, json!("2024-01-01T06:30")),
            (ColumnType::Date, json!("2024-01-01")),
            (ColumnType::Json, json!("{\"k\":[1]}")),
        ];
        for (class, raw) in cases {
            let first = coerce_value(class, &raw).unwrap();
            let text = first.to_text().unwrap();
            let again = match class {
                ColumnType::Json | ColumnType::Timestamp | ColumnType::Date => json!(text),
                _ => serde_json::to_value(&first).unwrap(),
            };
            assert_eq!(coerce_value(class, &again), Ok(first), "{raw}");
        }
    }

    #[test]
    fn coerce_builds_rows_in_column_order() {
        let columns = vec![ColumnDef::new("ts", "TIMESTAMP"), ColumnDef::new("temp", "FLOAT"), ColumnDef::new("note", "TEXT")];
        let mut candidate = RowCandidate::new();
        candidate.stage("temp", json!(5.2));
        candidate.stage("ts", json!("2024-01-01T00:00"));
        candidate.stage("unknown", json!(1));

        let row = coerce(&candidate, &columns).unwrap();
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["ts", "temp"]);
        assert_eq!(row.get("temp"), Some(&SqlValue::Float(5.2)));
    }

    #[test]
    fn coerce_names_the_failing_column() {
        let columns = vec![ColumnDef::new("ts", "TIMESTAMP")];
        let candidate = RowCandidate::from(json!({"ts": "bad-date"}).as_object().unwrap().clone());
        let err = coerce(&candidate, &columns).unwrap_err();
        assert_eq!(err.column, "ts");
        assert!(err.to_string().starts_with("column ts:"));
    }

    #[test]
    fn required_columns_must_be_present() {
        let columns = vec![ColumnDef::new("id", "INT NOT NULL"), ColumnDef::new("v", "TEXT")];
        let mut candidate = RowCandidate::new();
        candidate.stage("v", json!("x"));
        assert_eq!(coerce(&candidate, &columns).unwrap_err().reason, "required column is missing");

        candidate.stage("id", Value::Null);
        assert_eq!(coerce(&candidate, &columns).unwrap_err().reason, "required column is null");
    }

    #[test]
    fn batch_policies() {
        let columns = vec![ColumnDef::new("n", "INT")];
        let candidates: Vec<RowCandidate> = [json!(1), json!("x"), json!(3), json!("y")]
            .into_iter()
            .map(|v| {
                let mut c = RowCandidate::new();
                c.stage("n", v);
                c
            })
            .collect();

        let skipped = coerce_batch(&candidates, &columns, FailurePolicy::SkipRow);
        assert_eq!(skipped.rows.len(), 2);
        assert_eq!(skipped.skipped(), 2);
        assert_eq!(skipped.errors[0].0, 1);
        assert!(!skipped.aborted);

        let aborted = coerce_batch(&candidates, &columns, FailurePolicy::AbortBatch);
        assert!(aborted.aborted);
        assert_eq!(aborted.rows.len(), 1);
        assert_eq!(aborted.errors.len(), 1);
    }
}
