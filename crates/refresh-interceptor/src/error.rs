//! Errors surfaced to callers of the interceptor

use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::Value;
use transport::{Response, TransportError};

use crate::classify::{GENERIC_ERROR_MESSAGE, extract_message};

/// Why an intercepted call did not produce a successful response.
///
/// Failed responses are carried whole (status, headers and raw body) so
/// callers can pass them on exactly as received.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// The refresh call itself failed; propagated as received.
    #[error("refresh endpoint returned {}", .response.status)]
    RefreshEndpoint { response: Response },

    /// The session could not be renewed and the client was sent to `route`.
    /// Not retryable.
    #[error("session expired, redirected to {route}")]
    Redirected { route: String },

    /// Any other failed response, annotated with the extracted message.
    #[error("{message}")]
    Failed { response: Response, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl InterceptError {
    /// Human-readable message for the caller. Never fails.
    pub fn message(&self) -> String {
        match self {
            InterceptError::RefreshEndpoint { response } => extract_message(&response.json_body()),
            InterceptError::Failed { message, .. } => message.clone(),
            InterceptError::Redirected { .. } => self.to_string(),
            InterceptError::Transport(_) => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// The failed response, when there was one.
    pub fn response(&self) -> Option<&Response> {
        match self {
            InterceptError::RefreshEndpoint { response }
            | InterceptError::Failed { response, .. } => Some(response),
            InterceptError::Redirected { .. } | InterceptError::Transport(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            InterceptError::RefreshEndpoint { response }
            | InterceptError::Failed { response, .. } => Some(response),
            InterceptError::Redirected { .. } | InterceptError::Transport(_) => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }

    /// Raw body of the failed response, byte for byte.
    pub fn body(&self) -> Option<&Bytes> {
        self.response().map(|r| &r.body)
    }

    /// Body of the failed response as JSON; `Null` when absent or not JSON.
    pub fn json_body(&self) -> Value {
        self.response().map(Response::json_body).unwrap_or(Value::Null)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, InterceptError::Redirected { .. })
    }
}

/// Result alias for intercepted calls.
pub type Result<T> = std::result::Result<T, InterceptError>;
