use std::time::Duration;

use thiserror::Error;
use reqwest::Error as ReqwestError;
use tokio::io::Error as TokioIoError;
use url::ParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] ReqwestError),

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    UrlParse(#[from] ParseError),

    #[error("unsupported url scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("io error: {0}")]
    Io(#[from] TokioIoError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("invalid identifier '{0}' (allowed: A-Z a-z 0-9 _)")]
    InvalidIdentifier(String),

    #[error("table '{0}' does not exist")]
    MissingTable(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("{0} cancelled before it completed")]
    Cancelled(&'static str),

    #[error("background task failed: {0}")]
    Task(String),
}
