//! Single-flight access token refresh for outbound requests
//!
//! Wraps a `Transport` so that an expired access token costs the caller
//! nothing but latency. When any number of in-flight requests fail with 401
//! at once, exactly one refresh call is made; every one of them is replayed
//! with the new token if it succeeds, or fails with `Redirected` if it does not.
//!
//! Request lifecycle:
//! 1. Stored access token attached as `Bearer` (unless one is already present)
//! 2. 2xx → returned as is
//! 3. Refresh-tagged request fails → `RefreshEndpoint`, never refreshed
//! 4. 401 (status or body) → wait on `RefreshCoordinator`, replay once on success
//! 5. Refresh failed → navigator sent to login once per episode, `Redirected`
//! 6. Anything else → `Failed` with the first `errorMessage` entry

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod interceptor;
pub mod navigator;

#[cfg(test)]
mod test_support;

pub use classify::{Classification, GENERIC_ERROR_MESSAGE, classify, extract_message};
pub use coordinator::{RefreshConfig, RefreshCoordinator, RefreshOutcome};
pub use error::{InterceptError, Result};
pub use interceptor::RequestInterceptor;
pub use navigator::{LogNavigator, Navigator, RecordingNavigator};
