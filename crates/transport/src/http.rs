//! reqwest-backed transport
//!
//! Resolves a request target against the configured base URL, appends query
//! pairs, and returns the remote response verbatim (including error status
//! codes). Only failures that produce no response at all become errors.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Url;
use tracing::{debug, instrument};

use crate::{Request, Response, Result, Transport, TransportError};

/// HTTP transport over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Create a transport resolving relative targets against `base_url`.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(TransportError::InvalidRequest(format!(
                "base url must start with http:// or https://, got: {base_url}"
            )));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: None,
        })
    }

    /// Per-request timeout applied to every call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a request: absolute targets are used as-is, anything
    /// else is joined onto the base URL.
    pub fn resolve(&self, request: &Request) -> Result<Url> {
        let target = request.target();
        let raw = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}/{}", self.base_url, target.trim_start_matches('/'))
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid target {raw}: {e}")))?;
        if !request.query().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.query() {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    #[instrument(skip_all, fields(method = %request.method(), target = %request.target(), kind = ?request.kind()))]
    async fn execute(&self, request: Request) -> Result<Response> {
        let url = self.resolve(&request)?;

        let mut builder = self
            .client
            .request(request.method().clone(), url)
            .headers(request.headers().clone())
            .body(request.body().clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(format!("reading response body: {e}")))?;

        debug!(status = status.as_u16(), bytes = body.len(), "response received");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}
