//! Failure classification for intercepted responses
//!
//! Decides what a failed response means for the session: the refresh call
//! itself failed (terminal), the access token was rejected (refreshable), or
//! something unrelated went wrong (surfaced with a readable message).

use reqwest::StatusCode;
use serde_json::Value;
use transport::Request;

/// Message used whenever the error body doesn't carry a usable one.
pub const GENERIC_ERROR_MESSAGE: &str = "Something is wrong";

/// How an intercepted failure is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The failed request was the refresh call. Never refreshed again.
    RefreshEndpointFailure,
    /// The access token was rejected. Eligible for one refresh.
    AuthFailure,
    /// Anything else, with the message extracted from the body.
    OtherFailure { message: String },
}

/// Classify a failed response for `request`.
///
/// The refresh tag wins over the status: a refresh call that comes back 401
/// is still a refresh endpoint failure.
pub fn classify(request: &Request, status: StatusCode, body: &Value) -> Classification {
    if request.is_refresh() {
        return Classification::RefreshEndpointFailure;
    }
    if is_auth_failure(status, body) {
        return Classification::AuthFailure;
    }
    Classification::OtherFailure {
        message: extract_message(body),
    }
}

/// 401 either as the response status or as the body's numeric `status`
/// field (`401` and `401.0` alike).
pub fn is_auth_failure(status: StatusCode, body: &Value) -> bool {
    status == StatusCode::UNAUTHORIZED
        || body.get("status").and_then(Value::as_f64) == Some(401.0)
}

/// First entry of `errorMessage`, or the generic message for any other shape.
pub fn extract_message(body: &Value) -> String {
    body.get("errorMessage")
        .and_then(|messages| messages.get(0))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}
