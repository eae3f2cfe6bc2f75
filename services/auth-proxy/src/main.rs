//! Session-holding reverse proxy
//!
//! Single-binary Rust service that:
//! 1. Loads the session's credential pair from a local file
//! 2. Listens for incoming requests
//! 3. Forwards each one upstream with the session's access token
//! 4. Renews an expired access token once for all requests that hit the expiry
//! 5. Sends clients to the login route when the session cannot be renewed

mod config;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use refresh_interceptor::{RefreshConfig, RefreshCoordinator, RefreshOutcome, RequestInterceptor};
use session_auth::FileCredentialStore;
use transport::{HttpTransport, Transport};

use crate::config::Config;
use crate::proxy::{ProxyState, SessionNavigator};

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    navigator: Arc<SessionNavigator>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Wire the credential store, transport, and refresh coordinator together.
async fn build_state(config: &Config, prometheus: PrometheusHandle) -> Result<AppState> {
    let store = FileCredentialStore::load(config.auth.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.auth.credentials_path.display()
            )
        })?;
    if let Some(token) = &config.auth.refresh_token {
        store
            .seed_refresh_token(token)
            .await
            .context("failed to seed refresh token")?;
        info!("refresh token seeded from configuration");
    }

    let transport = HttpTransport::new(reqwest::Client::new(), &config.proxy.upstream_url)
        .context("invalid upstream_url")?
        .with_timeout(Duration::from_secs(config.proxy.timeout_secs));
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let navigator = Arc::new(SessionNavigator::new());
    let coordinator = RefreshCoordinator::new(
        Arc::new(store),
        transport.clone(),
        navigator.clone(),
        RefreshConfig {
            refresh_path: config.auth.refresh_path.clone(),
            login_route: config.auth.login_route.clone(),
            timeout: config.auth.refresh_timeout(),
        },
    );

    Ok(AppState {
        proxy: ProxyState::new(RequestInterceptor::new(transport, coordinator)),
        navigator,
        started_at: Instant::now(),
        prometheus,
    })
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit layer caps concurrent requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, LOG_LEVEL takes precedence over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-proxy");

    // Install before anything records
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        credentials_path = %config.auth.credentials_path.display(),
        login_route = %config.auth.login_route,
        "configuration loaded"
    );

    let app_state = build_state(&config, prometheus_handle).await?;
    let in_flight = app_state.proxy.in_flight.clone();
    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: uptime, request counters, and the refresh coordinator's view
/// of the session. 503 while the last refresh episode failed.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = state.proxy.interceptor.coordinator();
    let last_refresh = coordinator.last_outcome();

    let (status_code, status) = match last_refresh {
        RefreshOutcome::Failed => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        RefreshOutcome::Unknown | RefreshOutcome::Succeeded => {
            (axum::http::StatusCode::OK, "healthy")
        }
    };

    let body = serde_json::json!({
        "status": status,
        "refresh_state": coordinator.state_label(),
        "last_refresh": last_refresh.label(),
        "refresh_episodes": coordinator.episodes(),
        "session_losses": state.navigator.navigations(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.proxy.requests_total.load(Ordering::Relaxed),
        "errors_total": state.proxy.errors_total.load(Ordering::Relaxed),
        "in_flight": state.proxy.in_flight.load(Ordering::Relaxed),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that proxies everything but health and metrics.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
