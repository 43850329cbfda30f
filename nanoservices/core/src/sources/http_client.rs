use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, Response};
use serde_json::Value;
use url::Url;

use schemaflow_utils::error::Error;
use schemaflow_utils::SchemaflowResult;
use super::Source;

/// Bytes of an error body read and kept in the error message (2 KiB).
const ERROR_BODY_LIMIT: usize = 2048;

#[derive(Debug, Clone)]
pub struct HttpSourceBuilder {
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpSourceBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("schemaflow/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound for one request, body included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent<T: Into<String>>(mut self, user_agent: T) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> SchemaflowResult<HttpSource> {
        let client = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()?;
        Ok(HttpSource { client, timeout: self.timeout })
    }
}

/// Fetches JSON documents over HTTP GET.
pub struct HttpSource {
    client: ReqwestClient,
    timeout: Duration,
}

impl HttpSource {
    pub fn builder() -> HttpSourceBuilder {
        HttpSourceBuilder::new()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Accept only absolute http(s) URLs.
pub fn parse_source_url(raw: &str) -> SchemaflowResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::UnsupportedScheme(other.to_string())),
    }
}

/// Read at most `limit` bytes of a response body. The rest is never pulled
/// off the connection. A character cut at the limit is dropped.
async fn bounded_body(mut resp: Response, limit: usize) -> String {
    let mut body = Vec::with_capacity(limit.min(8 * 1024));
    while body.len() < limit {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "error body truncated by read failure");
                break;
            }
        }
    }
    utf8_prefix(&body)
}

fn utf8_prefix(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) if e.error_len().is_none() => String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, url: &str) -> SchemaflowResult<Value> {
        let url = parse_source_url(url)?;
        let resp = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() { Error::Timeout("fetch", self.timeout) } else { Error::Http(e) }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = bounded_body(resp, ERROR_BODY_LIMIT).await;
            return Err(Error::UpstreamStatus { status: status.as_u16(), body });
        }

        let bytes = resp.bytes().await?;
        tracing::debug!(url = %url, bytes = bytes.len(), "fetched source document");
        Ok(serde_json::from_slice(&bytes)?)
    }
}
