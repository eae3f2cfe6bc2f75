//! Refresh call construction and response handling
//!
//! The refresh call is `POST <base>/refresh?authorization=false` carrying the
//! refresh token as its bearer value and an empty body. The response is
//! expected to contain at least `{ "accessToken": "..." }`; any other fields
//! are ignored.

use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use transport::{Request, Transport};

use crate::constants::SKIP_AUTHORIZATION_PARAM;
use crate::error::{Error, Result};

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
}

/// Build the refresh request for `refresh_path`.
///
/// The request is tagged `RequestKind::Refresh`, so an interceptor never
/// starts another refresh when it fails.
pub fn refresh_request(refresh_path: &str, refresh_token: &Secret<String>) -> Result<Request> {
    let bearer = HeaderValue::from_str(&refresh_token.bearer())
        .map_err(|e| Error::Http(format!("refresh token is not a valid header value: {e}")))?;
    let (key, value) = SKIP_AUTHORIZATION_PARAM;
    Ok(Request::refresh(refresh_path)
        .with_query(key, value)
        .with_header(AUTHORIZATION, bearer))
}

/// Trade a refresh token for a new access token.
///
/// A transport failure, a non-2xx status, or a body without a string
/// `accessToken` are all errors.
pub async fn refresh_access_token(
    transport: &dyn Transport,
    refresh_path: &str,
    refresh_token: &Secret<String>,
) -> Result<TokenResponse> {
    let request = refresh_request(refresh_path, refresh_token)?;
    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Http(format!("refresh request failed: {e}")))?;

    if !response.is_success() {
        let body = String::from_utf8_lossy(&response.body);
        return Err(Error::RefreshRejected(format!(
            "refresh endpoint returned {}: {body}",
            response.status
        )));
    }

    serde_json::from_slice::<TokenResponse>(&response.body)
        .map_err(|e| Error::TokenParse(format!("{e}")))
}
