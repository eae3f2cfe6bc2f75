//! Session credentials and the refresh call
//!
//! Owns everything about the credential pair itself: where it lives, how the
//! refresh request is shaped, and how the refresh response is read. The
//! single-flight policy around it lives in `refresh-interceptor`.
//!
//! Credential flow:
//! 1. Access and refresh tokens are issued elsewhere and land in a `CredentialStore`
//! 2. An outbound call fails with 401
//! 3. `token::refresh_access_token()` trades the refresh token for a new access token
//! 4. The new access token is written back via `CredentialStore::set_access_token()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use token::{TokenResponse, refresh_access_token, refresh_request};
