//! Single-flight access token refresh
//!
//! The coordinator guarantees that at most one refresh call is in flight no
//! matter how many requests fail with 401 at the same time. The first caller
//! to find the coordinator `Idle` starts an episode; everyone arriving while
//! it runs parks as a waiter. When the refresh resolves, the outcome is sent
//! to every waiter exactly once and the coordinator goes back to `Idle`.
//!
//! Episode lifecycle:
//! 1. Auth failure arrives while `Idle` → `Refreshing { episode }`, refresh task spawned
//! 2. Further auth failures join the waiter list of that episode
//! 3. No refresh token → navigate to login, broadcast `Failed` (no network call)
//! 4. Refresh succeeds → new access token written to the store, broadcast `Succeeded`
//! 5. Refresh fails or times out → navigate to login, broadcast `Failed`
//! 6. Refresh task panics, or the episode itself is dropped → treated as a failed refresh
//! 7. Waiters drained, state back to `Idle`; the next 401 starts a fresh episode

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use session_auth::{CredentialStore, DEFAULT_LOGIN_ROUTE, DEFAULT_REFRESH_PATH};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::navigator::Navigator;

/// Result of a refresh episode as seen by its waiters.
///
/// `Unknown` is only ever observed through `last_outcome()` before the first
/// episode finishes or while one is running; waiters always receive a
/// terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unknown,
    Succeeded,
    Failed,
}

impl RefreshOutcome {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Unknown => "unknown",
            RefreshOutcome::Succeeded => "succeeded",
            RefreshOutcome::Failed => "failed",
        }
    }
}

/// Coordinator state.
///
/// Transitions:
/// - Idle → Refreshing (first auth failure of an episode)
/// - Refreshing → Refreshing (later failures join `waiters`)
/// - Refreshing → Idle (outcome broadcast, waiters drained)
#[derive(Debug)]
enum CoordinatorState {
    Idle,
    Refreshing {
        episode: u64,
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

/// Refresh endpoint and failure handling settings.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Refresh endpoint, relative to the transport base URL.
    pub refresh_path: String,
    /// Route navigated to when an episode fails.
    pub login_route: String,
    /// Upper bound on one refresh call. `None` waits indefinitely, which
    /// stalls every waiter for as long as the refresh call hangs.
    pub timeout: Option<Duration>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: CoordinatorState,
    last_outcome: RefreshOutcome,
    episodes: u64,
}

struct Inner {
    shared: Mutex<Shared>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    navigator: Arc<dyn Navigator>,
    config: RefreshConfig,
}

/// Owns the single-flight state machine. Cheap to clone; clones share state.
///
/// The state lives behind a synchronous mutex that is never held across an
/// `.await`, so the switch to `Refreshing` is visible to the very next caller
/// even when failures land in the same scheduling turn.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
        config: RefreshConfig,
    ) -> Self {
        info!(
            refresh_path = %config.refresh_path,
            login_route = %config.login_route,
            timeout_secs = config.timeout.map(|t| t.as_secs()),
            "refresh coordinator initialized"
        );
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: CoordinatorState::Idle,
                    last_outcome: RefreshOutcome::Unknown,
                    episodes: 0,
                }),
                store,
                transport,
                navigator,
                config,
            }),
        }
    }

    /// Wait for a refreshed access token.
    ///
    /// Starts a refresh episode if none is running, otherwise joins the
    /// current one. Resolves to `Succeeded` or `Failed`, never `Unknown`.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();

        let started = {
            let mut guard = self.inner.lock();
            let shared = &mut *guard;
            match &mut shared.state {
                CoordinatorState::Refreshing { episode, waiters } => {
                    waiters.push(tx);
                    debug!(
                        episode = *episode,
                        waiters = waiters.len(),
                        "joined refresh in progress"
                    );
                    None
                }
                CoordinatorState::Idle => {
                    shared.episodes += 1;
                    let episode = shared.episodes;
                    shared.state = CoordinatorState::Refreshing {
                        episode,
                        waiters: vec![tx],
                    };
                    shared.last_outcome = RefreshOutcome::Unknown;
                    Some(episode)
                }
            }
        };

        if let Some(episode) = started {
            info!(episode, "starting token refresh");
            tokio::spawn(Episode::new(self.inner.clone(), episode).run());
        }

        // A dropped sender means the episode died without broadcasting.
        rx.await.unwrap_or(RefreshOutcome::Failed)
    }

    /// `"idle"` or `"refreshing"`.
    pub fn state_label(&self) -> &'static str {
        match self.inner.lock().state {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Refreshing { .. } => "refreshing",
        }
    }

    /// Number of callers parked on the running episode.
    pub fn waiter_count(&self) -> usize {
        match &self.inner.lock().state {
            CoordinatorState::Idle => 0,
            CoordinatorState::Refreshing { waiters, .. } => waiters.len(),
        }
    }

    /// Outcome of the most recent finished episode.
    pub fn last_outcome(&self) -> RefreshOutcome {
        self.inner.lock().last_outcome
    }

    /// Episodes started since construction.
    pub fn episodes(&self) -> u64 {
        self.inner.lock().episodes
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn login_route(&self) -> &str {
        &self.inner.config.login_route
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One refresh attempt. Never touches coordinator state and never
    /// navigates; the episode does that for a `Failed` result.
    async fn refresh(&self, episode: u64) -> RefreshOutcome {
        let Some(refresh_token) = self.store.refresh_token().await else {
            warn!(episode, "no refresh token stored, redirecting to login");
            return RefreshOutcome::Failed;
        };

        let attempt = session_auth::refresh_access_token(
            self.transport.as_ref(),
            &self.config.refresh_path,
            &refresh_token,
        );
        let result = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("refresh timed out after {}ms", limit.as_millis())),
            },
            None => attempt.await.map_err(|e| e.to_string()),
        };

        let stored = match result {
            Ok(token) => self
                .store
                .set_access_token(token.access_token)
                .await
                .map_err(|e| format!("storing refreshed token: {e}")),
            Err(e) => Err(e),
        };

        match stored {
            Ok(()) => {
                info!(episode, "token refresh succeeded");
                RefreshOutcome::Succeeded
            }
            Err(error) => {
                warn!(episode, %error, "token refresh failed, redirecting to login");
                RefreshOutcome::Failed
            }
        }
    }

    fn navigate(&self, episode: u64) {
        metrics::counter!("auth_navigations_total").increment(1);
        debug!(episode, route = %self.config.login_route, "navigating");
        self.navigator.navigate(&self.config.login_route);
    }

    /// Send `outcome` to every waiter of `episode` and return to `Idle`.
    fn broadcast(&self, episode: u64, outcome: RefreshOutcome) {
        let waiters = {
            let mut shared = self.lock();
            match &shared.state {
                CoordinatorState::Refreshing { episode: current, .. } if *current == episode => {}
                _ => {
                    warn!(episode, "broadcast for an episode that is no longer running");
                    return;
                }
            }
            shared.last_outcome = outcome;
            match std::mem::replace(&mut shared.state, CoordinatorState::Idle) {
                CoordinatorState::Refreshing { waiters, .. } => waiters,
                CoordinatorState::Idle => Vec::new(),
            }
        };

        metrics::counter!("auth_refresh_total", "outcome" => outcome.label()).increment(1);
        info!(
            episode,
            outcome = outcome.label(),
            waiters = waiters.len(),
            "refresh episode finished"
        );
        for waiter in waiters {
            // The caller may have given up waiting; nothing to do then.
            let _ = waiter.send(outcome);
        }
    }
}

/// A running refresh episode.
///
/// The refresh attempt runs on its own task, so a panic in the store or the
/// transport comes back as a join error and is handled like any other
/// failure. Dropping the episode before it finishes (runtime shutdown, a
/// panicking navigator) still navigates at most once and broadcasts `Failed`
/// so no waiter is left parked.
struct Episode {
    inner: Arc<Inner>,
    id: u64,
    navigated: bool,
    finished: bool,
}

impl Episode {
    fn new(inner: Arc<Inner>, id: u64) -> Self {
        Self {
            inner,
            id,
            navigated: false,
            finished: false,
        }
    }

    async fn run(mut self) {
        let inner = self.inner.clone();
        let id = self.id;
        let outcome = match tokio::spawn(async move { inner.refresh(id).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(episode = id, error = %e, "refresh attempt aborted");
                RefreshOutcome::Failed
            }
        };

        if outcome == RefreshOutcome::Failed {
            self.navigate();
        }
        self.finished = true;
        self.inner.broadcast(self.id, outcome);
    }

    fn navigate(&mut self) {
        // Set first: if the navigator panics, the drop path must not call it again.
        self.navigated = true;
        self.inner.navigate(self.id);
    }
}

impl Drop for Episode {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(episode = self.id, "refresh episode abandoned");
        if !self.navigated && !std::thread::panicking() {
            self.navigate();
        }
        self.inner.broadcast(self.id, RefreshOutcome::Failed);
    }
}
