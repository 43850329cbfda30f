use std::path::{Path, PathBuf};

use crate::builder::{BuildError, TableBuilder};
use crate::config::types::{DurationSpec, EngineConfig, TableConfig};
use crate::scheduler::runner::RefreshSettings;
use crate::schema::types::{TableDefinition, TableKind};

/// Environment variable that overrides `database`.
pub const DATABASE_ENV: &str = "SCHEMAFLOW_DATABASE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: String, value: DurationSpec },
    #[error("table '{name}': {source}")]
    Table { name: String, source: BuildError },
}

/// Load a config file and apply environment overrides.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok(apply_overrides(config, |key| std::env::var(key).ok()))
}

/// Parse a config from a YAML string. No environment lookups.
pub fn parse_config(yaml: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_yaml::from_str(yaml)?;
    config.refresh_settings()?;
    for table in &config.tables {
        table.to_definition()?;
    }
    Ok(config)
}

/// Apply overrides from `lookup` (normally the process environment).
pub fn apply_overrides(mut config: EngineConfig, lookup: impl Fn(&str) -> Option<String>) -> EngineConfig {
    if let Some(database) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
        tracing::debug!(database = %database, "database overridden from environment");
        config.database = Some(PathBuf::from(database));
    }
    config
}

fn duration(field: &str, spec: &DurationSpec) -> Result<std::time::Duration, ConfigError> {
    spec.to_duration().ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: spec.clone(),
    })
}

impl EngineConfig {
    pub fn refresh_settings(&self) -> Result<RefreshSettings, ConfigError> {
        Ok(RefreshSettings {
            fetch_timeout: duration("fetch_timeout", &self.fetch_timeout)?,
            load_timeout: duration("load_timeout", &self.load_timeout)?,
            failure_policy: self.failure_policy,
        })
    }
}

impl TableConfig {
    pub fn to_definition(&self) -> Result<TableDefinition, ConfigError> {
        let mut builder = TableBuilder::new(&self.name)
            .kind(self.kind.unwrap_or(TableKind::Normal))
            .columns(self.columns.iter().cloned())
            .mapping(self.mapping.clone());
        if let Some(url) = &self.source_url {
            builder = builder.source_url(url);
        }
        if let Some(spec) = &self.refresh_interval {
            builder = builder.refresh_every(duration(&format!("{}.refresh_interval", self.name), spec)?);
        }
        builder.build().map_err(|source| ConfigError::Table { name: self.name.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::coerce::FailurePolicy;
    use std::time::Duration;

    const WEATHER: &str = r#"
database: /var/lib/schemaflow/control.db
fetch_timeout: 15s
load_timeout: 60
failure_policy: abort_batch
history_limit: 20

tables:
  - name: weather_data
    kind: time_series
    columns:
      - { name: ts, type: TIMESTAMP }
      - { name: temp, type: FLOAT }
    source_url: "https://api.open-meteo.com/v1/forecast?latitude=52.52&longitude=13.41&hourly=temperature_2m"
    refresh_interval: 1h
    mapping:
      hourly.time: ts
      hourly.temperature_2m: temp

  - name: notes
    columns:
      - { name: body, type: TEXT }
"#;

    #[test]
    fn parse_full_config() {
        let config = parse_config(WEATHER).unwrap();
        let settings = config.refresh_settings().unwrap();
        assert_eq!(settings.fetch_timeout, Duration::from_secs(15));
        assert_eq!(settings.load_timeout, Duration::from_secs(60));
        assert_eq!(settings.failure_policy, FailurePolicy::AbortBatch);
        assert_eq!(config.history_limit, 20);

        let weather = config.tables[0].to_definition().unwrap();
        assert_eq!(weather.refresh_interval, Some(3600));
        assert_eq!(weather.mapping.column_for("hourly.temperature_2m"), Some("temp"));
        assert!(weather.is_schedulable());

        let notes = config.tables[1].to_definition().unwrap();
        assert_eq!(notes.kind, TableKind::Normal);
        assert!(notes.mapping.is_empty());
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = parse_config("{}").unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.refresh_settings().unwrap().fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.failure_policy, FailurePolicy::SkipRow);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_duration = parse_config("fetch_timeout: soon\n");
        assert!(matches!(bad_duration, Err(ConfigError::InvalidDuration { .. })));

        let bad_table = parse_config(
            "tables:\n  - name: notes\n    columns: [{ name: body, type: TEXT }]\n    refresh_interval: 60\n",
        );
        assert!(matches!(bad_table, Err(ConfigError::Table { .. })));
    }

    #[test]
    fn database_env_override() {
        let config = parse_config(WEATHER).unwrap();
        let config = apply_overrides(config, |key| (key == DATABASE_ENV).then(|| "/tmp/other.db".to_string()));
        assert_eq!(config.database, Some(PathBuf::from("/tmp/other.db")));

        let config = apply_overrides(EngineConfig::default(), |_| None);
        assert!(config.database.is_none());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemaflow.yaml");
        std::fs::write(&path, "history_limit: 7\n").unwrap();
        assert_eq!(load_config(&path).unwrap().history_limit, 7);
        assert!(matches!(load_config(dir.path().join("missing.yaml")), Err(ConfigError::Io(_))));
    }
}
