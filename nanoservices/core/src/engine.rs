use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use schemaflow_utils::error::Error;

use crate::config::loader::ConfigError;
use crate::config::types::EngineConfig;
use crate::control::{ControlError, ControlPlane};
use crate::destinations::sqlite::SqliteDestination;
use crate::destinations::traits::Destination;
use crate::events::bus::EventBus;
use crate::schema::registry::{RegistryError, SchemaRegistry};
use crate::scheduler::jobs::JobManager;
use crate::scheduler::runner::{self, Refresher};
use crate::sources::http_client::HttpSource;
use crate::sources::traits::Source;
use crate::store::db::Store;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] Error),
    #[error("control store: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("bootstrap of table '{table}' failed: {source}")]
    Bootstrap { table: String, source: ControlError },
}

/// Top-level orchestrator. Configure it, then `start` or `run`.
pub struct SchemaFlow {
    config: EngineConfig,
    source: Option<Arc<dyn Source>>,
    destination: Option<Arc<dyn Destination>>,
}

impl Default for SchemaFlow {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl SchemaFlow {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, source: None, destination: None }
    }

    /// Replace the HTTP source, e.g. with a fixture in tests.
    pub fn with_source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Replace the SQLite destination.
    pub fn with_destination(mut self, destination: impl Destination + 'static) -> Self {
        self.destination = Some(Arc::new(destination));
        self
    }

    /// Open storage, create bootstrap tables, start timers and the dispatcher.
    pub async fn start(self) -> Result<Engine, EngineError> {
        let settings = self.config.refresh_settings()?;

        let store = match &self.config.database {
            Some(path) => Store::open(path)?,
            None => Store::in_memory()?,
        };
        let store = Arc::new(Mutex::new(store));

        let destination = match self.destination {
            Some(destination) => destination,
            None => match &self.config.database {
                Some(path) => Arc::new(SqliteDestination::open(path)?) as Arc<dyn Destination>,
                None => Arc::new(SqliteDestination::in_memory()?),
            },
        };
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSource::builder().timeout(settings.fetch_timeout).build()?) as Arc<dyn Source>,
        };

        let registry = SchemaRegistry::new(store.clone());
        let refresher = Refresher::new(store, source, destination, settings);

        let bus = EventBus::new(EVENT_BUS_CAPACITY);
        let (event_tx, event_rx) = bus.split();
        let jobs = Arc::new(JobManager::new(event_tx));
        let control = ControlPlane::new(registry.clone(), refresher.clone(), jobs.clone(), self.config.history_limit);

        for table in &self.config.tables {
            let def = table.to_definition()?;
            if registry.contains(&def.name).await? {
                tracing::debug!(table = %def.name, "bootstrap table already registered");
                continue;
            }
            control
                .create_table(def)
                .await
                .map_err(|source| EngineError::Bootstrap { table: table.name.clone(), source })?;
        }

        let defs: Vec<_> = registry.list().await?.into_iter().map(|row| row.definition).collect();
        jobs.sync(&defs);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let metrics = match self.config.metrics_addr {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr).await.map_err(Error::Io)?;
                tracing::info!(addr = %addr, "serving metrics");
                let mut rx = shutdown_rx.clone();
                Some(tokio::spawn(crate::metrics::serve_metrics(listener, async move {
                    let _ = rx.changed().await;
                })))
            }
            None => None,
        };

        let scheduler = tokio::spawn(runner::run_scheduler(event_rx, refresher.clone(), registry, shutdown_rx));

        tracing::info!(tables = defs.len(), scheduled = jobs.scheduled().len(), "schemaflow started");
        Ok(Engine { control, refresher, jobs, shutdown_tx, scheduler, metrics })
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), EngineError> {
        self.run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves.
    pub async fn run_with_shutdown<F: Future>(self, shutdown: F) -> Result<(), EngineError> {
        let engine = self.start().await?;
        shutdown.await;
        engine.shutdown().await;
        Ok(())
    }
}

/// A started engine.
pub struct Engine {
    control: ControlPlane,
    refresher: Refresher,
    jobs: Arc<JobManager>,
    shutdown_tx: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    metrics: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn control(&self) -> ControlPlane {
        self.control.clone()
    }

    /// Stop timers and the dispatcher, then wait for running refreshes.
    pub async fn shutdown(self) {
        self.jobs.stop_all();
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.scheduler.await {
            tracing::error!(error = %e, "scheduler task failed");
        }
        self.refresher.slots().wait_idle().await;
        if let Some(metrics) = self.metrics {
            let _ = metrics.await;
        }
        tracing::info!("schemaflow shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::store::history::AttemptStatus;
    use async_trait::async_trait;
    use schemaflow_utils::SchemaflowResult;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Source for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }
        async fn fetch(&self, _url: &str) -> SchemaflowResult<Value> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"hourly": {"time": ["2024-01-01T00:00"], "temperature_2m": [5.2]}}))
        }
    }

    const CONFIG: &str = r#"
tables:
  - name: weather_data
    kind: time_series
    columns: [{ name: ts, type: TIMESTAMP }, { name: temp, type: FLOAT }]
    source_url: https://example.test/forecast
    refresh_interval: 1
    mapping:
      hourly.time: ts
      hourly.temperature_2m: temp
"#;

    #[tokio::test]
    async fn engine_bootstraps_and_refreshes_on_schedule() {
        let count = Arc::new(AtomicUsize::new(0));
        let engine = SchemaFlow::new(parse_config(CONFIG).unwrap())
            .with_source(CountingSource { count: count.clone() })
            .start()
            .await
            .unwrap();
        let control = engine.control();
        assert_eq!(control.list_tables().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        engine.shutdown().await;

        let fetched = count.load(Ordering::SeqCst);
        assert!(fetched >= 1, "expected a scheduled refresh, got {fetched}");
        let history = control.history("weather_data", None).await.unwrap();
        assert_eq!(history.len(), fetched);
        assert!(history.iter().all(|a| a.status == AttemptStatus::Success));
    }

    #[tokio::test]
    async fn bootstrap_leaves_existing_tables_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = parse_config(CONFIG).unwrap();
        config.database = Some(dir.path().join("schemaflow.db"));
        config.tables[0].refresh_interval = None;

        let engine = SchemaFlow::new(config.clone()).start().await.unwrap();
        engine
            .control()
            .update_config(
                "weather_data",
                crate::schema::types::ConfigUpdate::default().source_url(Some("https://example.test/v2".into())),
            )
            .await
            .unwrap();
        engine.shutdown().await;

        let engine = SchemaFlow::new(config).start().await.unwrap();
        let cfg = engine.control().table_config("weather_data").await.unwrap();
        assert_eq!(cfg.source_url.as_deref(), Some("https://example.test/v2"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn run_with_shutdown_returns() {
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            SchemaFlow::default().run_with_shutdown(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
