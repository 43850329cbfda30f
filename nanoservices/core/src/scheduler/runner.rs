use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use uuid::Uuid;

use schemaflow_utils::error::Error;
use schemaflow_utils::{timestamp_now, SchemaflowResult};

use crate::destinations::traits::Destination;
use crate::events::trigger::{Trigger, TriggerEvent, TriggerKind};
use crate::mapping::resolver::resolve_records;
use crate::schema::registry::{RegistryError, SchemaRegistry};
use crate::schema::types::TableDefinition;
use crate::scheduler::state::{RunGuard, TableSlots};
use crate::sources::traits::Source;
use crate::store::db::Store;
use crate::store::history::{AttemptStatus, NewAttempt, RefreshAttempt};
use crate::transforms::coerce::{coerce_batch, FailurePolicy, RowError};

/// Row errors quoted in a history message before the rest are only counted.
const QUOTED_ROW_ERRORS: usize = 3;

/// Knobs shared by every refresh.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub fetch_timeout: Duration,
    pub load_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            load_timeout: Duration::from_secs(30),
            failure_policy: FailurePolicy::SkipRow,
        }
    }
}

/// Why an attempt failed. The display text is what lands in history.
#[derive(Debug, thiserror::Error)]
enum RefreshFailure {
    #[error("no source url configured")]
    NoSource,
    #[error("fetch failed: {0}")]
    Fetch(Error),
    #[error("no records could be mapped from source{}", unresolved_note(.0))]
    NoRecords(Vec<String>),
    #[error("no rows could be mapped: {0}")]
    NoRows(String),
    #[error("batch aborted at row {index}: {error}")]
    Aborted { index: usize, error: RowError },
    #[error("load failed: {0}")]
    Load(Error),
}

struct Loaded {
    rows: u64,
    skipped: Vec<(usize, RowError)>,
    unresolved: Vec<String>,
}

impl Loaded {
    fn message(&self) -> String {
        let mut message = format!("Inserted {} rows", self.rows);
        if !self.skipped.is_empty() {
            message.push_str(&format!(
                "; skipped {} rows ({})",
                self.skipped.len(),
                summarize_row_errors(&self.skipped)
            ));
        }
        message.push_str(&unresolved_note(&self.unresolved));
        message
    }
}

fn unresolved_note(paths: &[String]) -> String {
    if paths.is_empty() {
        String::new()
    } else {
        format!("; unresolved paths: {}", paths.join(", "))
    }
}

fn summarize_row_errors(errors: &[(usize, RowError)]) -> String {
    let mut parts: Vec<String> = errors
        .iter()
        .take(QUOTED_ROW_ERRORS)
        .map(|(index, error)| format!("row {index}: {error}"))
        .collect();
    if errors.len() > QUOTED_ROW_ERRORS {
        parts.push(format!("and {} more", errors.len() - QUOTED_ROW_ERRORS));
    }
    parts.join("; ")
}

/// Runs the fetch → map → coerce → load sequence for one table and records it.
#[derive(Clone)]
pub struct Refresher {
    store: Arc<Mutex<Store>>,
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    slots: TableSlots,
    settings: RefreshSettings,
}

impl Refresher {
    pub fn new(
        store: Arc<Mutex<Store>>,
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
        settings: RefreshSettings,
    ) -> Self {
        Self { store, source, destination, slots: TableSlots::new(), settings }
    }

    pub fn slots(&self) -> &TableSlots {
        &self.slots
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    pub fn source(&self) -> Arc<dyn Source> {
        self.source.clone()
    }

    pub fn destination(&self) -> Arc<dyn Destination> {
        self.destination.clone()
    }

    /// Claim the table, or count the rejection when it is already running.
    pub fn try_acquire(&self, table: &str) -> Option<RunGuard> {
        let guard = self.slots.try_acquire(table);
        if guard.is_none() {
            tracing::warn!(table = %table, "refresh already in progress; trigger rejected");
            crate::metrics::inc_rejected(table);
        }
        guard
    }

    /// Run one refresh on a snapshot of the definition. Exactly one history
    /// record is appended; the slot is released after it is written.
    pub async fn execute(
        &self,
        guard: RunGuard,
        def: TableDefinition,
        trigger: TriggerKind,
    ) -> SchemaflowResult<RefreshAttempt> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = timestamp_now();
        let clock = Instant::now();
        tracing::info!(run = %run_id, table = %def.name, trigger = %trigger, "refresh started");

        let (status, message, rows_affected) = match self.refresh(&def).await {
            Ok(loaded) => (AttemptStatus::Success, loaded.message(), loaded.rows),
            Err(failure) => (AttemptStatus::Failure, failure.to_string(), 0),
        };
        let finished_at = timestamp_now();
        let duration_ms = clock.elapsed().as_millis() as f64;

        let attempt = {
            let store = self.store.lock().await;
            let attempt = store.append_attempt(&NewAttempt {
                run_id: run_id.clone(),
                table: def.name.clone(),
                trigger,
                status,
                message: message.clone(),
                rows_affected,
                started_at,
                finished_at: finished_at.clone(),
            })?;
            let error = (status == AttemptStatus::Failure).then_some(message.as_str());
            store.record_outcome(&def.name, status, &finished_at, error)?;
            attempt
        };

        crate::metrics::record_attempt(&def.name, status);
        crate::metrics::add_rows_loaded(&def.name, rows_affected);
        crate::metrics::observe_duration(&def.name, duration_ms);
        match status {
            AttemptStatus::Success => tracing::info!(
                run = %run_id,
                table = %def.name,
                rows = rows_affected,
                duration_ms = duration_ms,
                "refresh succeeded"
            ),
            AttemptStatus::Failure => tracing::warn!(
                run = %run_id,
                table = %def.name,
                error = %message,
                duration_ms = duration_ms,
                "refresh failed"
            ),
        }

        guard.finish(status);
        Ok(attempt)
    }

    async fn refresh(&self, def: &TableDefinition) -> Result<Loaded, RefreshFailure> {
        let url = def.source_url.as_deref().ok_or(RefreshFailure::NoSource)?;
        let fetch_timeout = self.settings.fetch_timeout;
        let document = tokio::time::timeout(fetch_timeout, self.source.fetch(url))
            .await
            .map_err(|_| RefreshFailure::Fetch(Error::Timeout("fetch", fetch_timeout)))?
            .map_err(RefreshFailure::Fetch)?;

        let resolution = resolve_records(&document, &def.mapping);
        if resolution.candidates.is_empty() {
            return Err(RefreshFailure::NoRecords(resolution.unresolved));
        }
        tracing::debug!(
            table = %def.name,
            candidates = resolution.candidates.len(),
            unresolved = resolution.unresolved.len(),
            "records resolved"
        );

        let mut outcome = coerce_batch(&resolution.candidates, &def.columns, self.settings.failure_policy);
        if outcome.aborted {
            if let Some((index, error)) = outcome.errors.pop() {
                return Err(RefreshFailure::Aborted { index, error });
            }
        }
        if outcome.rows.is_empty() {
            return Err(RefreshFailure::NoRows(summarize_row_errors(&outcome.errors)));
        }

        let load_timeout = self.settings.load_timeout;
        let rows = tokio::time::timeout(load_timeout, self.destination.insert_rows(&def.name, outcome.rows))
            .await
            .map_err(|_| RefreshFailure::Load(Error::Timeout("load", load_timeout)))?
            .map_err(RefreshFailure::Load)?;

        Ok(Loaded { rows, skipped: outcome.errors, unresolved: resolution.unresolved })
    }
}

/// Dispatcher loop: turns trigger events into refreshes until shutdown, then
/// waits for the refreshes it started.
pub async fn run_scheduler(
    mut event_rx: mpsc::Receiver<TriggerEvent>,
    refresher: Refresher,
    registry: SchemaRegistry,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let def = match registry.definition(&event.table).await {
                    Ok(def) => def,
                    Err(RegistryError::UnknownTable(_)) => {
                        tracing::warn!(table = %event.table, "trigger for unknown table ignored");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(table = %event.table, error = %e, "could not load table definition");
                        continue;
                    }
                };
                if matches!(event.trigger, Trigger::Interval(_)) && !def.is_schedulable() {
                    tracing::debug!(table = %def.name, "table no longer scheduled; tick dropped");
                    continue;
                }
                let Some(guard) = refresher.try_acquire(&def.name) else { continue };

                let refresher = refresher.clone();
                let kind = event.trigger.kind();
                in_flight.spawn(async move {
                    let table = def.name.clone();
                    if let Err(e) = refresher.execute(guard, def, kind).await {
                        tracing::error!(table = %table, error = %e, "failed to record refresh");
                    }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "refresh task aborted");
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("scheduler shutting down");
                break;
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "refresh task aborted");
        }
    }
}
