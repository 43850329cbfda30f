//! Configuration surface: the operations an API layer or CLI calls.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use schemaflow_utils::error::Error;
use schemaflow_utils::{Row, SchemaflowResult};

use crate::events::trigger::TriggerKind;
use crate::mapping::flatten::{flatten, FlatDocument};
use crate::mapping::preview::truncate_preview;
use crate::mapping::resolver::RowCandidate;
use crate::schema::registry::{RegistryError, SchemaRegistry};
use crate::schema::types::{ColumnDef, ConfigUpdate, Mapping, TableDefinition};
use crate::scheduler::jobs::JobManager;
use crate::scheduler::runner::Refresher;
use crate::sources::http_client::parse_source_url;
use crate::store::db::TableMetadataRow;
use crate::store::history::{RefreshAttempt, StatusBreakdown};
use crate::transforms::coerce::{coerce_batch, RowError};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("refresh already in progress for table '{0}'")]
    RefreshInProgress(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("table '{0}' has no source url")]
    NoSource(String),
    #[error("ingest into '{table}' aborted at record {index}: {error}")]
    IngestAborted { table: String, index: usize, error: RowError },
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Backend(#[from] Error),
}

impl From<RegistryError> for ControlError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownTable(name) => ControlError::UnknownTable(name),
            RegistryError::Storage(e) => ControlError::Storage(e),
            other => ControlError::Registry(other),
        }
    }
}

/// The mutable refresh configuration of a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshConfig {
    pub source_url: Option<String>,
    pub refresh_interval: Option<u64>,
    pub mapping: Mapping,
}

impl From<&TableDefinition> for RefreshConfig {
    fn from(def: &TableDefinition) -> Self {
        Self {
            source_url: def.source_url.clone(),
            refresh_interval: def.refresh_interval,
            mapping: def.mapping.clone(),
        }
    }
}

/// Result of loading records handed in directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub inserted: u64,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct ControlPlane {
    registry: SchemaRegistry,
    refresher: Refresher,
    jobs: Arc<JobManager>,
    history_limit: usize,
    /// Held across a registry write and the timer sync that follows it.
    changes: Arc<Mutex<()>>,
}

impl ControlPlane {
    pub fn new(registry: SchemaRegistry, refresher: Refresher, jobs: Arc<JobManager>, history_limit: usize) -> Self {
        Self { registry, refresher, jobs, history_limit, changes: Arc::new(Mutex::new(())) }
    }

    /// Register a table and create it in the destination. The registry entry
    /// is rolled back when the destination refuses the table.
    pub async fn create_table(&self, def: TableDefinition) -> Result<TableMetadataRow, ControlError> {
        let _changes = self.changes.lock().await;
        let row = self.registry.create(def.clone()).await?;
        let destination = self.refresher.destination();
        if let Err(e) = destination.create_table(&def.name, def.kind, &def.columns).await {
            tracing::error!(table = %def.name, error = %e, "destination rejected table; rolling back");
            if let Err(rollback) = self.registry.delete(&def.name).await {
                tracing::error!(table = %def.name, error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }
        self.jobs.sync_table(&def);
        tracing::info!(table = %def.name, kind = %def.kind, columns = def.columns.len(), "table created");
        Ok(row)
    }

    /// Drop a table. Its refresh history is kept.
    pub async fn delete_table(&self, name: &str) -> Result<(), ControlError> {
        let _changes = self.changes.lock().await;
        self.registry.delete(name).await?;
        self.jobs.remove(name);
        self.refresher.slots().forget(name);
        self.refresher.destination().delete_table(name).await?;
        tracing::info!(table = %name, "table deleted");
        Ok(())
    }

    pub async fn list_tables(&self) -> Result<Vec<TableMetadataRow>, ControlError> {
        Ok(self.registry.list().await?)
    }

    pub async fn table(&self, name: &str) -> Result<TableMetadataRow, ControlError> {
        Ok(self.registry.get(name).await?)
    }

    pub async fn columns(&self, name: &str) -> Result<Vec<ColumnDef>, ControlError> {
        Ok(self.registry.definition(name).await?.columns)
    }

    pub async fn table_config(&self, name: &str) -> Result<RefreshConfig, ControlError> {
        Ok(RefreshConfig::from(&self.registry.definition(name).await?))
    }

    /// Change source, interval or mapping. Timers pick the change up from the
    /// next tick; a refresh already running keeps its snapshot.
    pub async fn update_config(&self, name: &str, update: ConfigUpdate) -> Result<RefreshConfig, ControlError> {
        let _changes = self.changes.lock().await;
        let def = self.registry.update_config(name, update).await?;
        self.jobs.sync_table(&def);
        Ok(RefreshConfig::from(&def))
    }

    /// Start a manual refresh in the background. The handle resolves to the
    /// attempt record; dropping it lets the refresh finish unobserved.
    pub async fn trigger_refresh(&self, name: &str) -> Result<JoinHandle<SchemaflowResult<RefreshAttempt>>, ControlError> {
        let def = self.registry.definition(name).await?;
        if def.source_url.is_none() {
            return Err(ControlError::NoSource(def.name));
        }
        let guard = self
            .refresher
            .try_acquire(&def.name)
            .ok_or_else(|| ControlError::RefreshInProgress(def.name.clone()))?;
        let refresher = self.refresher.clone();
        Ok(tokio::spawn(async move { refresher.execute(guard, def, TriggerKind::Manual).await }))
    }

    /// Manual refresh that waits for the attempt record.
    pub async fn refresh_now(&self, name: &str) -> Result<RefreshAttempt, ControlError> {
        let handle = self.trigger_refresh(name).await?;
        let attempt = handle.await.map_err(|e| Error::Task(e.to_string()))??;
        Ok(attempt)
    }

    /// Attempts for a table, newest first. Works for deleted tables too.
    pub async fn history(&self, name: &str, limit: Option<usize>) -> Result<Vec<RefreshAttempt>, ControlError> {
        let limit = limit.unwrap_or(self.history_limit);
        let store = self.registry.store();
        let attempts = store.lock().await.attempts_for(name, limit)?;
        Ok(attempts)
    }

    pub async fn status_breakdown(&self, table: Option<&str>) -> Result<StatusBreakdown, ControlError> {
        let store = self.registry.store();
        let breakdown = store.lock().await.status_breakdown(table)?;
        Ok(breakdown)
    }

    /// Leaf paths of a sample document, as mappings refer to them.
    pub fn preview_flatten(&self, document: &Value) -> FlatDocument {
        flatten(document)
    }

    /// Fetch a URL and return a shortened copy of the document.
    pub async fn preview_source(&self, url: &str) -> Result<Value, ControlError> {
        parse_source_url(url)?;
        let timeout = self.refresher.settings().fetch_timeout;
        let document = tokio::time::timeout(timeout, self.refresher.source().fetch(url))
            .await
            .map_err(|_| Error::Timeout("fetch", timeout))??;
        Ok(truncate_preview(&document))
    }

    /// Load records keyed by column name. Keys that are not columns are
    /// dropped; values go through the same coercion as refreshes. Under
    /// `AbortBatch` the first bad record fails the call and nothing is stored.
    pub async fn ingest(&self, name: &str, records: Vec<Map<String, Value>>) -> Result<IngestReport, ControlError> {
        let def = self.registry.definition(name).await?;
        let candidates: Vec<RowCandidate> = records
            .into_iter()
            .map(|mut record| {
                record.retain(|key, _| def.column(key).is_some());
                RowCandidate::from(record)
            })
            .filter(|candidate| !candidate.is_empty())
            .collect();

        let mut outcome = coerce_batch(&candidates, &def.columns, self.refresher.settings().failure_policy);
        if outcome.aborted {
            if let Some((index, error)) = outcome.errors.pop() {
                tracing::warn!(table = %def.name, index = index, error = %error, "ingest aborted");
                return Err(ControlError::IngestAborted { table: def.name, index, error });
            }
        }
        let (rows, errors) = (outcome.rows, outcome.errors);
        let inserted = if rows.is_empty() {
            0
        } else {
            self.refresher.destination().insert_rows(&def.name, rows).await?
        };
        tracing::info!(table = %def.name, inserted = inserted, skipped = errors.len(), "records ingested");
        Ok(IngestReport {
            inserted,
            skipped: errors.len(),
            errors: errors.iter().map(|(i, e)| format!("record {i}: {e}")).collect(),
        })
    }

    /// Stored rows in insertion order.
    pub async fn query(&self, name: &str, limit: Option<usize>) -> Result<Vec<Row>, ControlError> {
        let def = self.registry.definition(name).await?;
        Ok(self.refresher.destination().query(&def.name, limit).await?)
    }
}
