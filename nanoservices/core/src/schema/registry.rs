use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use schemaflow_utils::timestamp_now;

use crate::schema::types::{is_identifier, is_sql_type, ColumnDef, ConfigUpdate, Mapping, TableDefinition, TableKind};
use crate::sources::http_client::parse_source_url;
use crate::store::db::{Store, TableMetadataRow};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("table '{0}' already exists")]
    DuplicateTable(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("mapping targets unknown column '{column}' of table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("column '{0}' is the target of more than one mapping path")]
    DuplicateMappingTarget(String),
    #[error("mapping path for column '{0}' is empty")]
    EmptyMappingPath(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("'{0}' is not a valid identifier (letters, digits and underscores only)")]
    InvalidIdentifier(String),
    #[error("invalid SQL type '{sql_type}' for column '{column}'")]
    InvalidSqlType { column: String, sql_type: String },
    #[error("table '{0}' needs at least one column")]
    NoColumns(String),
    #[error("refresh interval is only allowed on time-series tables ('{0}' is normal)")]
    IntervalRequiresTimeSeries(String),
    #[error("refresh interval must be at least one second")]
    ZeroInterval,
    #[error("invalid source url: {0}")]
    InvalidSourceUrl(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

/// Check a full definition before it is persisted.
pub fn validate_definition(def: &TableDefinition) -> Result<(), RegistryError> {
    if !is_identifier(&def.name) {
        return Err(RegistryError::InvalidIdentifier(def.name.clone()));
    }
    if def.columns.is_empty() {
        return Err(RegistryError::NoColumns(def.name.clone()));
    }
    let mut seen = HashSet::new();
    for column in &def.columns {
        if !is_identifier(&column.name) {
            return Err(RegistryError::InvalidIdentifier(column.name.clone()));
        }
        if !is_sql_type(&column.sql_type) {
            return Err(RegistryError::InvalidSqlType {
                column: column.name.clone(),
                sql_type: column.sql_type.clone(),
            });
        }
        if !seen.insert(column.name.as_str()) {
            return Err(RegistryError::DuplicateColumn(column.name.clone()));
        }
    }
    validate_configuration(def)
}

/// The mutable part of a definition: source url, interval and mapping.
fn validate_configuration(def: &TableDefinition) -> Result<(), RegistryError> {
    match def.refresh_interval {
        Some(0) => return Err(RegistryError::ZeroInterval),
        Some(_) if def.kind == TableKind::Normal => {
            return Err(RegistryError::IntervalRequiresTimeSeries(def.name.clone()))
        }
        _ => {}
    }
    if let Some(url) = &def.source_url {
        parse_source_url(url).map_err(|e| RegistryError::InvalidSourceUrl(e.to_string()))?;
    }
    validate_mapping(&def.name, &def.columns, &def.mapping)
}

/// Every mapping target must be a column of the table, and no column may be
/// targeted twice.
pub fn validate_mapping(table: &str, columns: &[ColumnDef], mapping: &Mapping) -> Result<(), RegistryError> {
    let mut targeted = HashSet::new();
    for (path, column) in mapping.iter() {
        if path.is_empty() {
            return Err(RegistryError::EmptyMappingPath(column.to_string()));
        }
        if !columns.iter().any(|c| c.name == column) {
            return Err(RegistryError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        if !targeted.insert(column) {
            return Err(RegistryError::DuplicateMappingTarget(column.to_string()));
        }
    }
    Ok(())
}

/// Durable table definitions, backed by the control store.
#[derive(Clone)]
pub struct SchemaRegistry {
    store: Arc<Mutex<Store>>,
}

impl SchemaRegistry {
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<Mutex<Store>> {
        self.store.clone()
    }

    pub async fn create(&self, def: TableDefinition) -> Result<TableMetadataRow, RegistryError> {
        validate_definition(&def)?;
        let store = self.store.lock().await;
        if store.get_table(&def.name)?.is_some() {
            return Err(RegistryError::DuplicateTable(def.name));
        }
        store.insert_table(&def, &timestamp_now())?;
        store
            .get_table(&def.name)?
            .ok_or(RegistryError::UnknownTable(def.name))
    }

    pub async fn get(&self, name: &str) -> Result<TableMetadataRow, RegistryError> {
        self.store
            .lock()
            .await
            .get_table(name)?
            .ok_or_else(|| RegistryError::UnknownTable(name.to_string()))
    }

    pub async fn definition(&self, name: &str) -> Result<TableDefinition, RegistryError> {
        Ok(self.get(name).await?.definition)
    }

    pub async fn contains(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.store.lock().await.get_table(name)?.is_some())
    }

    pub async fn list(&self) -> Result<Vec<TableMetadataRow>, RegistryError> {
        Ok(self.store.lock().await.list_tables()?)
    }

    /// Apply a configuration change. Nothing is written unless the resulting
    /// definition is valid as a whole.
    pub async fn update_config(&self, name: &str, update: ConfigUpdate) -> Result<TableDefinition, RegistryError> {
        let store = self.store.lock().await;
        let mut def = store
            .get_table(name)?
            .ok_or_else(|| RegistryError::UnknownTable(name.to_string()))?
            .definition;
        update.apply(&mut def);
        validate_configuration(&def)?;
        store.update_table_config(&def, &timestamp_now())?;
        tracing::info!(
            table = %name,
            source_url = ?def.source_url,
            refresh_interval = ?def.refresh_interval,
            mapped = def.mapping.len(),
            "table configuration updated"
        );
        Ok(def)
    }

    /// Remove a definition and return it. Refresh history stays.
    pub async fn delete(&self, name: &str) -> Result<TableDefinition, RegistryError> {
        let store = self.store.lock().await;
        let def = store
            .get_table(name)?
            .ok_or_else(|| RegistryError::UnknownTable(name.to_string()))?
            .definition;
        store.delete_table(name)?;
        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> TableDefinition {
        TableDefinition {
            name: "weather_data".to_string(),
            kind: TableKind::TimeSeries,
            columns: vec![ColumnDef::new("ts", "TIMESTAMP"), ColumnDef::new("temp", "FLOAT")],
            source_url: Some("https://api.open-meteo.com/v1/forecast".to_string()),
            refresh_interval: Some(3600),
            mapping: [("hourly.time", "ts"), ("hourly.temperature_2m", "temp")].into_iter().collect(),
        }
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(Arc::new(Mutex::new(Store::in_memory().unwrap())))
    }

    #[tokio::test]
    async fn create_then_get_and_list() {
        let registry = registry();
        let created = registry.create(weather()).await.unwrap();
        assert_eq!(created.status, "NEW");

        assert_eq!(registry.definition("weather_data").await.unwrap(), weather());
        assert_eq!(registry.list().await.unwrap().len(), 1);
        assert!(matches!(registry.create(weather()).await, Err(RegistryError::DuplicateTable(_))));
    }

    #[test]
    fn definitions_are_validated() {
        let mut def = weather();
        def.name = "weather-data".into();
        assert!(matches!(validate_definition(&def), Err(RegistryError::InvalidIdentifier(_))));

        let mut def = weather();
        def.columns.push(ColumnDef::new("ts", "TEXT"));
        assert!(matches!(validate_definition(&def), Err(RegistryError::DuplicateColumn(_))));

        let mut def = weather();
        def.columns[1].sql_type = "FLOAT; DROP TABLE x".into();
        assert!(matches!(validate_definition(&def), Err(RegistryError::InvalidSqlType { .. })));

        let mut def = weather();
        def.columns.clear();
        def.mapping = Mapping::new();
        assert!(matches!(validate_definition(&def), Err(RegistryError::NoColumns(_))));

        let mut def = weather();
        def.kind = TableKind::Normal;
        assert!(matches!(validate_definition(&def), Err(RegistryError::IntervalRequiresTimeSeries(_))));

        let mut def = weather();
        def.source_url = Some("ftp://example.com/x".into());
        assert!(matches!(validate_definition(&def), Err(RegistryError::InvalidSourceUrl(_))));
    }

    #[test]
    fn mapping_targets_must_be_distinct_columns() {
        let columns = weather().columns;
        let unknown: Mapping = [("a", "nope")].into_iter().collect();
        assert!(matches!(
            validate_mapping("weather_data", &columns, &unknown),
            Err(RegistryError::UnknownColumn { .. })
        ));

        let twice: Mapping = [("a", "ts"), ("b", "ts")].into_iter().collect();
        assert!(matches!(
            validate_mapping("weather_data", &columns, &twice),
            Err(RegistryError::DuplicateMappingTarget(c)) if c == "ts"
        ));
    }

    #[tokio::test]
    async fn invalid_update_leaves_stored_config_alone() {
        let registry = registry();
        registry.create(weather()).await.unwrap();

        let bad = ConfigUpdate::default().mapping([("x", "missing")].into_iter().collect());
        assert!(registry.update_config("weather_data", bad).await.is_err());
        assert_eq!(registry.definition("weather_data").await.unwrap().mapping, weather().mapping);

        let disable = ConfigUpdate::default().refresh_interval(None);
        let def = registry.update_config("weather_data", disable).await.unwrap();
        assert_eq!(def.refresh_interval, None);
        assert!(!def.is_schedulable());
        assert_eq!(registry.definition("weather_data").await.unwrap().refresh_interval, None);
    }

    #[tokio::test]
    async fn delete_and_unknown_table() {
        let registry = registry();
        registry.create(weather()).await.unwrap();
        registry.delete("weather_data").await.unwrap();

        assert!(!registry.contains("weather_data").await.unwrap());
        assert!(matches!(registry.get("weather_data").await, Err(RegistryError::UnknownTable(_))));
        assert!(matches!(registry.delete("weather_data").await, Err(RegistryError::UnknownTable(_))));
    }
}
