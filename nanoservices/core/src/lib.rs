//! schemaflow_core: mapping, coercion and scheduled refreshes for
//! schema-driven tables.
//!
//! Tables are declared with typed columns, a JSON source URL and a mapping
//! from flattened source paths to columns. A refresh fetches the document,
//! resolves the mapping into row candidates, coerces them to the declared
//! types and loads them, leaving one history record per attempt.
//!
//! ```no_run
//! use std::time::Duration;
//! use schemaflow_core::builder::TableBuilder;
//! use schemaflow_core::config::EngineConfig;
//! use schemaflow_core::engine::SchemaFlow;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SchemaFlow::new(EngineConfig::default()).start().await?;
//! let control = engine.control();
//! control
//!     .create_table(
//!         TableBuilder::new("weather_data")
//!             .time_series()
//!             .column("ts", "TIMESTAMP")
//!             .column("temp", "FLOAT")
//!             .source_url("https://api.open-meteo.com/v1/forecast?latitude=52.52&longitude=13.41&hourly=temperature_2m")
//!             .refresh_every(Duration::from_secs(3600))
//!             .map("hourly.time", "ts")
//!             .map("hourly.temperature_2m", "temp")
//!             .build()?,
//!     )
//!     .await?;
//! let attempt = control.refresh_now("weather_data").await?;
//! println!("{}", attempt.message);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod control;
pub mod destinations;
pub mod engine;
pub mod events;
pub mod mapping;
pub mod schema;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod transforms;

pub mod logging;

pub mod metrics;
