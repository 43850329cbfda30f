use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::json;

use schemaflow_core::builder::TableBuilder;
use schemaflow_core::config::EngineConfig;
use schemaflow_core::engine::SchemaFlow;
use schemaflow_core::sources::http_client::HttpSource;
use schemaflow_core::sources::Source;
use schemaflow_core::store::history::AttemptStatus;
use schemaflow_utils::error::Error;

async fn route(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match req.uri().path() {
        "/forecast" => Response::new(Body::from(
            json!({
                "latitude": 52.52,
                "hourly": {"time": ["2024-01-01T00:00", "2024-01-01T01:00"], "temperature_2m": [5.2, 4.9]}
            })
            .to_string(),
        )),
        "/broken" => Response::new(Body::from("<html>not json</html>")),
        "/huge" => {
            let mut failed = Response::new(Body::from("é".repeat(600_000)));
            *failed.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            failed
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Response::new(Body::from("{}"))
        }
        _ => {
            let mut unavailable = Response::new(Body::from("x".repeat(5000)));
            *unavailable.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            unavailable
        }
    };
    Ok(response)
}

fn serve() -> SocketAddr {
    let make = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(route)) });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make);
    let addr = server.local_addr();
    tokio::spawn(async move {
        if let Err(e) = server.await {
            eprintln!("test server error: {e}");
        }
    });
    addr
}

#[tokio::test]
async fn fetches_and_parses_json() {
    let addr = serve();
    let source = HttpSource::builder().build().unwrap();

    let doc = source.fetch(&format!("http://{addr}/forecast")).await.unwrap();
    assert_eq!(doc["hourly"]["temperature_2m"][1], json!(4.9));
}

#[tokio::test]
async fn non_success_status_keeps_a_bounded_body() {
    let addr = serve();
    let source = HttpSource::builder().build().unwrap();

    match source.fetch(&format!("http://{addr}/down")).await {
        Err(Error::UpstreamStatus { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body.len(), 2048);
        }
        other => panic!("expected upstream status error, got {other:?}"),
    }
}

#[tokio::test]
async fn large_error_body_is_cut_at_two_kib() {
    let addr = serve();
    let source = HttpSource::builder().build().unwrap();

    match source.fetch(&format!("http://{addr}/huge")).await {
        Err(Error::UpstreamStatus { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body.len(), 2048);
            assert!(body.chars().all(|c| c == 'é'));
        }
        other => panic!("expected upstream status error, got {other:?}"),
    }
}

#[tokio::test]
async fn body_must_be_json() {
    let addr = serve();
    let source = HttpSource::builder().build().unwrap();
    let result = source.fetch(&format!("http://{addr}/broken")).await;
    assert!(matches!(result, Err(Error::Json(_))));
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let addr = serve();
    let source = HttpSource::builder().timeout(Duration::from_millis(200)).build().unwrap();
    let result = source.fetch(&format!("http://{addr}/slow")).await;
    assert!(matches!(result, Err(Error::Timeout("fetch", _))), "{result:?}");
}

#[tokio::test]
async fn engine_refreshes_from_http_source() {
    let addr = serve();
    let engine = SchemaFlow::new(EngineConfig::default()).start().await.unwrap();
    let control = engine.control();

    let table = TableBuilder::new("weather_data")
        .time_series()
        .column("ts", "TIMESTAMP")
        .column("temp", "FLOAT")
        .column("lat", "REAL")
        .source_url(format!("http://{addr}/forecast"))
        .map("hourly.time", "ts")
        .map("hourly.temperature_2m", "temp")
        .map("latitude", "lat")
        .build()
        .unwrap();
    control.create_table(table).await.unwrap();

    let preview = control.preview_source(&format!("http://{addr}/forecast")).await.unwrap();
    assert_eq!(preview["latitude"], json!(52.52));

    let attempt = control.refresh_now("weather_data").await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert_eq!(attempt.rows_affected, 2);

    let bad = control
        .update_config(
            "weather_data",
            schemaflow_core::schema::ConfigUpdate::default().source_url(Some(format!("http://{addr}/down"))),
        )
        .await
        .unwrap();
    assert!(bad.source_url.is_some());
    let failed = control.refresh_now("weather_data").await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failure);
    assert!(failed.message.starts_with("fetch failed: upstream returned status 503"));

    engine.shutdown().await;
}
