//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers, and hands them to
//! the refresh interceptor, which attaches the session's access token and
//! recovers from expiry. Upstream responses, failed ones included, are
//! returned verbatim (status, end-to-end headers, raw body); a session that
//! could not be renewed becomes a 302 to the login route.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use refresh_interceptor::{InterceptError, Navigator, RequestInterceptor};
use tracing::{error, info, instrument, warn};
use transport::{Request, TransportError};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest inbound body the proxy buffers.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler
#[derive(Clone)]
pub struct ProxyState {
    pub interceptor: RequestInterceptor,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

impl ProxyState {
    pub fn new(interceptor: RequestInterceptor) -> Self {
        Self {
            interceptor,
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Decrements `in_flight` when the request finishes, however it finishes.
struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Logs the session loss once per failed refresh episode.
///
/// Clients are redirected per request by `proxy_request`; this only counts
/// how often the session itself was lost.
#[derive(Debug, Default)]
pub struct SessionNavigator {
    navigations: AtomicU64,
}

impl SessionNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn navigations(&self) -> u64 {
        self.navigations.load(Ordering::Relaxed)
    }
}

impl Navigator for SessionNavigator {
    fn navigate(&self, route: &str) {
        self.navigations.fetch_add(1, Ordering::Relaxed);
        warn!(route, "session could not be renewed, clients will be sent to login");
    }
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// 302 to the login route with a JSON body for non-browser clients.
fn redirect_response(route: &str, request_id: &str) -> Response {
    let mut response = error_response(
        StatusCode::FOUND,
        "session_expired",
        "session expired, sign in again",
        request_id,
    );
    match route.parse::<HeaderValue>() {
        Ok(location) => {
            response.headers_mut().insert(LOCATION, location);
        }
        Err(e) => warn!(route, error = %e, "login route is not a valid Location header"),
    }
    response
}

fn upstream_response(response: transport::Response, request_id: &str) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        if !is_hop_by_hop(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder.body(Body::from(response.body)).unwrap_or_else(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "proxy_error",
            &format!("response build error: {e}"),
            request_id,
        )
    })
}

/// Headers forwarded upstream: everything but hop-by-hop, `Host`, and the
/// client's own `Authorization`. The session's token is attached by the
/// interceptor.
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str()) || name == HOST || name == AUTHORIZATION {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Proxy an inbound request through the refresh interceptor.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<Body>,
    request_id: String,
) -> Response {
    let _in_flight = InFlightGuard::enter(&state.in_flight);
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = forwarded_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "proxy_error",
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };

    let outbound = Request::new(method.clone(), target)
        .with_headers(headers)
        .with_body(body);

    let response = match state.interceptor.intercept(outbound).await {
        Ok(upstream) => upstream_response(upstream, &request_id),
        Err(InterceptError::Redirected { route }) => {
            crate::metrics::record_session_redirect();
            info!(route = %route, "redirecting client to login");
            redirect_response(&route, &request_id)
        }
        Err(InterceptError::RefreshEndpoint { response }) => {
            warn!(status = response.status.as_u16(), "refresh endpoint failed");
            upstream_response(response, &request_id)
        }
        Err(InterceptError::Failed { response, message }) => {
            info!(status = response.status.as_u16(), %message, "upstream request failed");
            upstream_response(response, &request_id)
        }
        Err(InterceptError::Transport(err)) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            let (status, error_type) = match &err {
                TransportError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                TransportError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                TransportError::Http(_) => (StatusCode::BAD_GATEWAY, "connection"),
            };
            crate::metrics::record_upstream_error(error_type);
            error!(error = %err, "upstream request failed");
            error_response(status, "proxy_error", &err.to_string(), &request_id)
        }
    };

    crate::metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
