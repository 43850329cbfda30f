use std::convert::Infallible;
use std::future::Future;
use std::net::TcpListener as StdTcpListener;
use std::thread::JoinHandle;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::store::history::AttemptStatus;

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("schemaflow".to_string()), None).expect("valid metrics prefix")
});

static REFRESH_ATTEMPTS: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("refresh_attempts_total", "Finished refresh attempts by outcome");
    let c = CounterVec::new(opts, &["table", "status"]).expect("valid counter definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ROWS_LOADED: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("rows_loaded_total", "Rows written to user tables by refreshes");
    let c = CounterVec::new(opts, &["table"]).expect("valid counter definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static REFRESH_REJECTED: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("refresh_rejected_total", "Triggers rejected because a refresh was running");
    let c = CounterVec::new(opts, &["table"]).expect("valid counter definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static REFRESH_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("refresh_duration_ms", "Refresh duration in milliseconds")
        .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0]);
    let h = HistogramVec::new(opts, &["table"]).expect("valid histogram definition");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub fn record_attempt(table: &str, status: AttemptStatus) {
    REFRESH_ATTEMPTS.with_label_values(&[table, status.as_str()]).inc();
}

pub fn add_rows_loaded(table: &str, rows: u64) {
    ROWS_LOADED.with_label_values(&[table]).inc_by(rows as f64);
}

pub fn inc_rejected(table: &str) {
    REFRESH_REJECTED.with_label_values(&[table]).inc();
}

#[cfg(test)]
pub(crate) fn rejected_count(table: &str) -> f64 {
    REFRESH_REJECTED.with_label_values(&[table]).get()
}

pub fn observe_duration(table: &str, duration_ms: f64) {
    REFRESH_DURATION_MS.with_label_values(&[table]).observe(duration_ms);
}

/// Current registry contents in the Prometheus text exposition format.
///
/// ```no_run
/// use schemaflow_core::metrics;
/// metrics::inc_rejected("weather_data");
/// println!("{}", metrics::gather_text());
/// ```
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn respond(req: &Request<Body>) -> Response<Body> {
    if req.method() == &Method::GET && req.uri().path() == "/metrics" {
        let mut ok = Response::new(Body::from(gather_text()));
        ok.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
        ok
    } else {
        let mut missing = Response::new(Body::empty());
        *missing.status_mut() = StatusCode::NOT_FOUND;
        missing
    }
}

/// Serve `/metrics` on `listener` until `shutdown` resolves.
pub async fn serve_metrics<F>(listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("metrics exporter shutdown requested");
                break;
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        let svc = service_fn(|req: Request<Body>| async move {
                            Ok::<_, Infallible>(respond(&req))
                        });
                        tokio::spawn(async move {
                            if let Err(err) = hyper::server::conn::Http::new().serve_connection(stream, svc).await {
                                tracing::warn!(peer = %peer, error = %err, "metrics connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to accept metrics connection");
                        break;
                    }
                }
            }
        }
    }
    tracing::info!("metrics exporter stopped");
}

/// Run the exporter on its own thread and runtime, for callers outside tokio.
/// Send on (or drop) the returned sender to stop it.
pub fn start_exporter(listener: StdTcpListener) -> std::io::Result<(JoinHandle<()>, oneshot::Sender<()>)> {
    listener.set_nonblocking(true)?;
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let (tx, rx) = oneshot::channel();
    let handle = std::thread::Builder::new()
        .name("schemaflow-metrics".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                match TcpListener::from_std(listener) {
                    Ok(listener) => serve_metrics(listener, async { let _ = rx.await; }).await,
                    Err(e) => tracing::error!(error = %e, "failed to register metrics listener"),
                }
            })
        })?;
    Ok((handle, tx))
}
