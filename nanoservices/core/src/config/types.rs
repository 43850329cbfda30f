use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::schema::types::{ColumnDef, Mapping, TableKind};
use crate::transforms::coerce::FailurePolicy;

/// Engine settings, usually read from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// SQLite file for the control store and user tables; in-memory when unset.
    pub database: Option<PathBuf>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: DurationSpec,
    #[serde(default = "default_load_timeout")]
    pub load_timeout: DurationSpec,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Attempts returned by a history query without an explicit limit.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Serve Prometheus metrics here when set.
    pub metrics_addr: Option<SocketAddr>,
    /// Tables created on startup when they do not exist yet.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: None,
            fetch_timeout: default_fetch_timeout(),
            load_timeout: default_load_timeout(),
            failure_policy: FailurePolicy::default(),
            history_limit: default_history_limit(),
            metrics_addr: None,
            tables: Vec::new(),
        }
    }
}

fn default_fetch_timeout() -> DurationSpec {
    DurationSpec::Seconds(10)
}

fn default_load_timeout() -> DurationSpec {
    DurationSpec::Seconds(30)
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub kind: Option<TableKind>,
    pub columns: Vec<ColumnDef>,
    pub source_url: Option<String>,
    pub refresh_interval: Option<DurationSpec>,
    #[serde(default)]
    pub mapping: Mapping,
}

/// A duration given either as integer seconds or as text: "90", "250ms",
/// "10s", "5m", "1h".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Seconds(u64),
    Text(String),
}

impl DurationSpec {
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            DurationSpec::Seconds(secs) => Some(Duration::from_secs(*secs)),
            DurationSpec::Text(text) => parse_duration(text.trim()),
        }
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}
