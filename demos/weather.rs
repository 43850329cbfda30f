use std::time::Duration;

use schemaflow::core::logging;
use schemaflow::{load_config, EngineConfig, SchemaFlow, TableBuilder};

/// Registers an hourly Open-Meteo table, refreshes it once and keeps the
/// schedule running until Ctrl-C. Pass a YAML config path to use it instead.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => EngineConfig { metrics_addr: Some("127.0.0.1:9898".parse()?), ..EngineConfig::default() },
    };
    let engine = SchemaFlow::new(config).start().await?;
    let control = engine.control();

    if control.table("weather_data").await.is_err() {
        let table = TableBuilder::new("weather_data")
            .time_series()
            .column("ts", "TIMESTAMP")
            .column("temp", "FLOAT")
            .source_url("https://api.open-meteo.com/v1/forecast?latitude=52.52&longitude=13.41&hourly=temperature_2m")
            .refresh_every(Duration::from_secs(3600))
            .map("hourly.time", "ts")
            .map("hourly.temperature_2m", "temp")
            .build()?;
        control.create_table(table).await?;
    }

    let attempt = control.refresh_now("weather_data").await?;
    println!("{} ({}): {}", attempt.status.as_str(), attempt.run_id, attempt.message);
    for row in control.query("weather_data", Some(5)).await? {
        println!("{}", serde_json::to_string(&row)?);
    }

    let _ = tokio::signal::ctrl_c().await;
    engine.shutdown().await;
    Ok(())
}
