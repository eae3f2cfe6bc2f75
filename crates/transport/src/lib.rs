//! Outbound request model and transport abstraction
//!
//! Defines the `Transport` trait that decouples the refresh interceptor from
//! the HTTP client actually putting bytes on the wire. `HttpTransport` is the
//! reqwest-backed implementation; tests substitute scripted in-process fakes.

pub mod http;
pub mod request;

pub use http::HttpTransport;
pub use request::{Request, RequestKind, Response};

use std::future::Future;
use std::pin::Pin;

/// Errors raised before any response was received.
///
/// A non-2xx response is *not* a transport error: it is returned as a
/// `Response` and left to the caller to classify.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Sends a `Request` and resolves to whatever the remote side answered.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>>;
}
