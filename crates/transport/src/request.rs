//! Immutable request/response values exchanged with a `Transport`

use bytes::Bytes;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::{Result, TransportError};

/// What a request is for, fixed when it is built.
///
/// Refresh calls are tagged here instead of being recognized by URL, so the
/// interceptor never has to compare against a configured endpoint string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Ordinary,
    Refresh,
}

/// Description of one outbound call.
///
/// `target` is either a path relative to the transport's base URL or an
/// absolute URL. Requests are cloned, not edited, when headers need to change
/// for a replay.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    kind: RequestKind,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            kind: RequestKind::Ordinary,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// A POST to the refresh endpoint, tagged so it is never re-intercepted.
    pub fn refresh(target: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Refresh,
            ..Self::new(Method::POST, target)
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Copy of this request whose `Authorization` header is exactly
    /// `Bearer <token>`. Every existing `Authorization` value is dropped first.
    pub fn with_bearer(&self, token: &str) -> Result<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid bearer token: {e}")))?;
        let mut replayed = self.clone();
        replayed.headers.remove(AUTHORIZATION);
        replayed.headers.append(AUTHORIZATION, value);
        Ok(replayed)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn is_refresh(&self) -> bool {
        self.kind == RequestKind::Refresh
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

/// Response as received from the remote side, success or not.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body parsed as JSON, or `Value::Null` when it isn't JSON.
    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}
