//! Scripted in-process API used by the coordinator and interceptor tests.
//!
//! Ordinary requests succeed only when they carry `Bearer <valid token>`.
//! The refresh endpoint counts calls, can be held behind a gate, and on
//! success makes the issued token the valid one.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue, RETRY_AFTER};
use serde_json::json;
use session_auth::{Credentials, MemoryCredentialStore};
use tokio::sync::Semaphore;
use transport::{Request, Response, Transport, TransportError};

use crate::coordinator::{RefreshConfig, RefreshCoordinator};
use crate::navigator::RecordingNavigator;

/// Request as the fake API saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub target: String,
    pub authorization: Option<String>,
    pub query: Vec<(String, String)>,
}

pub struct FakeApi {
    valid_token: Mutex<String>,
    issued_token: String,
    refresh_status: StatusCode,
    refresh_in_maintenance: bool,
    gate: Option<Arc<Semaphore>>,
    refresh_calls: AtomicUsize,
    refreshes: Mutex<Vec<Seen>>,
    ordinary: Mutex<Vec<Seen>>,
}

impl FakeApi {
    /// API that currently accepts `valid` and hands out `issued` on refresh.
    pub fn new(valid: &str, issued: &str) -> Self {
        Self {
            valid_token: Mutex::new(valid.to_string()),
            issued_token: issued.to_string(),
            refresh_status: StatusCode::OK,
            refresh_in_maintenance: false,
            gate: None,
            refresh_calls: AtomicUsize::new(0),
            refreshes: Mutex::new(Vec::new()),
            ordinary: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting_refresh(mut self, status: StatusCode) -> Self {
        self.refresh_status = status;
        self
    }

    /// Refresh endpoint answers with `maintenance_response`.
    pub fn refresh_in_maintenance(mut self) -> Self {
        self.refresh_in_maintenance = true;
        self
    }

    /// Hold every refresh call until the returned semaphore gets a permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Invalidate whatever token is currently accepted.
    pub fn expire(&self) {
        *self.valid_token.lock().unwrap() = "revoked".into();
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> Vec<Seen> {
        self.refreshes.lock().unwrap().clone()
    }

    pub fn ordinary(&self) -> Vec<Seen> {
        self.ordinary.lock().unwrap().clone()
    }

    fn seen(request: &Request) -> Seen {
        Seen {
            target: request.target().to_string(),
            authorization: request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            query: request.query().to_vec(),
        }
    }

    async fn handle(&self, request: Request) -> transport::Result<Response> {
        let seen = Self::seen(&request);

        if request.is_refresh() {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refreshes.lock().unwrap().push(seen);
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.unwrap();
                permit.forget();
            }
            if self.refresh_in_maintenance {
                return Ok(maintenance_response("refresh backend down for maintenance"));
            }
            if !self.refresh_status.is_success() {
                return Ok(json_response(
                    self.refresh_status,
                    json!({"status": self.refresh_status.as_u16(), "errorMessage": ["refresh token expired"]}),
                ));
            }
            *self.valid_token.lock().unwrap() = self.issued_token.clone();
            return Ok(json_response(
                StatusCode::OK,
                json!({"accessToken": self.issued_token, "tokenType": "Bearer"}),
            ));
        }

        self.ordinary.lock().unwrap().push(seen.clone());
        match seen.target.as_str() {
            "/offline" => return Err(TransportError::Http("connection refused".into())),
            "/boom" => {
                return Ok(json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"errorMessage": ["database down"]}),
                ));
            }
            "/maintenance" => return Ok(maintenance_response("scheduled maintenance")),
            "/always-401" => {
                return Ok(json_response(
                    StatusCode::UNAUTHORIZED,
                    json!({"status": 401, "errorMessage": ["account locked"]}),
                ));
            }
            _ => {}
        }

        let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
        if seen.authorization.as_deref() == Some(expected.as_str()) {
            Ok(json_response(StatusCode::OK, json!({"ok": seen.target})))
        } else {
            Ok(json_response(
                StatusCode::UNAUTHORIZED,
                json!({"status": 401, "errorMessage": ["jwt expired"]}),
            ))
        }
    }
}

impl Transport for FakeApi {
    fn send(
        &self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = transport::Result<Response>> + Send + '_>> {
        Box::pin(self.handle(request))
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    Response::new(status, body.to_string())
}

/// 503 with a plain-text body and `Retry-After: 120`.
pub fn maintenance_response(text: &'static str) -> Response {
    let mut response = Response::new(StatusCode::SERVICE_UNAVAILABLE, text);
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
        .headers
        .insert(RETRY_AFTER, HeaderValue::from_static("120"));
    response
}

/// Everything a coordinator test needs to observe.
pub struct Harness {
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryCredentialStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub coordinator: RefreshCoordinator,
}

pub fn harness(api: FakeApi, credentials: Credentials) -> Harness {
    harness_with(api, credentials, RefreshConfig::default())
}

pub fn harness_with(api: FakeApi, credentials: Credentials, config: RefreshConfig) -> Harness {
    let api = Arc::new(api);
    let store = Arc::new(MemoryCredentialStore::new(credentials));
    let navigator = Arc::new(RecordingNavigator::new());
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        api.clone(),
        navigator.clone(),
        config,
    );
    Harness {
        api,
        store,
        navigator,
        coordinator,
    }
}

/// Wait until `n` callers are parked on the current episode.
pub async fn wait_for_waiters(coordinator: &RefreshCoordinator, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.waiter_count() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("waiters never registered");
}
