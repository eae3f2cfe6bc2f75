//! Outbound request interception
//!
//! Every request goes through `RequestInterceptor::intercept`. Successful
//! responses pass through untouched. Failures are classified; an auth failure
//! waits on the shared refresh episode and, if the session was renewed, the
//! original request is replayed exactly once with the new bearer token.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use tracing::{debug, instrument, warn};
use transport::{Request, RequestKind, Response, Transport};

use crate::classify::{Classification, classify, extract_message};
use crate::coordinator::{RefreshCoordinator, RefreshOutcome};
use crate::error::{InterceptError, Result};

/// Where an outgoing request's `Authorization` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Authorized {
    ByCaller,
    FromStore,
}

/// Sends requests and recovers from expired access tokens.
///
/// Cheap to clone; clones share the transport and the coordinator.
#[derive(Clone)]
pub struct RequestInterceptor {
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
}

impl RequestInterceptor {
    pub fn new(transport: Arc<dyn Transport>, coordinator: RefreshCoordinator) -> Self {
        Self {
            transport,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send `request`, refreshing the session at most once on auth failure.
    ///
    /// An ordinary request without an `Authorization` header gets the stored
    /// access token attached first. Refresh-tagged requests are sent as is
    /// and never trigger a refresh of their own.
    #[instrument(skip_all, fields(method = %request.method(), target = %request.target()))]
    pub async fn intercept(&self, request: Request) -> Result<Response> {
        let (request, authorized) = self.authorize(request).await?;

        let response = self.transport.send(request.clone()).await?;
        if response.is_success() {
            return Ok(response);
        }

        match classify(&request, response.status, &response.json_body()) {
            Classification::RefreshEndpointFailure => {
                warn!(status = %response.status, "refresh endpoint failed");
                Err(InterceptError::RefreshEndpoint { response })
            }
            Classification::OtherFailure { message } => {
                debug!(status = %response.status, %message, "request failed");
                Err(InterceptError::Failed { response, message })
            }
            Classification::AuthFailure => self.recover(request, authorized, response).await,
        }
    }

    /// Attach the stored access token unless the request brings its own.
    async fn authorize(&self, request: Request) -> Result<(Request, Authorized)> {
        if request.kind() != RequestKind::Ordinary || request.has_authorization() {
            return Ok((request, Authorized::ByCaller));
        }
        match self.coordinator.credential_store().access_token().await {
            Some(token) => Ok((request.with_bearer(token.expose())?, Authorized::FromStore)),
            None => Ok((request, Authorized::FromStore)),
        }
    }

    /// Wait on the refresh episode, then replay once.
    ///
    /// If the request went out with the stored token and the store now holds
    /// a different one, an episode finished while the request was in flight;
    /// the request is replayed without starting another refresh.
    async fn recover(
        &self,
        request: Request,
        authorized: Authorized,
        rejected: Response,
    ) -> Result<Response> {
        let renewed_meanwhile = authorized == Authorized::FromStore
            && match self.coordinator.credential_store().access_token().await {
                Some(current) => {
                    let sent = request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
                    sent != Some(current.bearer().as_str())
                }
                None => false,
            };

        if renewed_meanwhile {
            debug!(status = %rejected.status, "token already renewed, replaying without refresh");
        } else {
            debug!(status = %rejected.status, "access token rejected, awaiting refresh");
            match self.coordinator.request_refresh().await {
                RefreshOutcome::Succeeded => {}
                RefreshOutcome::Failed | RefreshOutcome::Unknown => {
                    // The coordinator already navigated for this episode.
                    return Err(InterceptError::Redirected {
                        route: self.coordinator.login_route().to_string(),
                    });
                }
            }
        }

        let Some(token) = self.coordinator.credential_store().access_token().await else {
            warn!("refresh succeeded but no access token is stored");
            let message = extract_message(&rejected.json_body());
            return Err(InterceptError::Failed {
                response: rejected,
                message,
            });
        };

        let replay = request.with_bearer(token.expose())?;
        let response = self.transport.send(replay).await?;
        if response.is_success() {
            debug!("replay succeeded");
            return Ok(response);
        }

        // A replay is never refreshed again, whatever it failed with.
        let message = extract_message(&response.json_body());
        warn!(status = %response.status, %message, "replay failed");
        Err(InterceptError::Failed { response, message })
    }
}
