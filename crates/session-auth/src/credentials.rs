//! Credential storage for the session token pair
//!
//! `CredentialStore` is the seam between the refresh flow and wherever the
//! application persists its tokens. Two implementations ship here:
//! `FileCredentialStore` keeps the pair in a JSON file written atomically, and
//! `MemoryCredentialStore` keeps it in process for embedders and tests.
//!
//! Only the access token is ever written by the refresh flow. The refresh
//! token is read-only input to it.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Access/refresh token pair as persisted.
///
/// Field names match the storage slots (`accessToken`, `refreshToken`).
/// An empty string is treated the same as an absent value.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: Option<&str>, refresh_token: Option<&str>) -> Self {
        Self {
            access_token: access_token.map(str::to_owned),
            refresh_token: refresh_token.map(str::to_owned),
        }
    }

    fn access(&self) -> Option<Secret<String>> {
        non_empty(&self.access_token)
    }

    fn refresh(&self) -> Option<Secret<String>> {
        non_empty(&self.refresh_token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<Secret<String>> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(Secret::from)
}

/// Read/write access to the persisted token pair.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Current access token, if any.
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    /// Current refresh token, if any.
    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    /// Replace the access token after a successful refresh.
    fn set_access_token(&self, token: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            state: RwLock::new(credentials),
        }
    }

    /// Snapshot of the stored pair.
    pub async fn credentials(&self) -> Credentials {
        self.state.read().await.clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.state.read().await.access() })
    }

    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.state.read().await.refresh() })
    }

    fn set_access_token(&self, token: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.write().await.access_token = Some(token);
            debug!("updated access token");
            Ok(())
        })
    }
}

/// JSON-file credential store.
///
/// All writes use atomic temp-file + rename to prevent corruption on crash. A
/// tokio Mutex serializes writes; reads lock briefly to clone a value out.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Credentials>,
}

impl FileCredentialStore {
    /// Load the token pair from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}`. Every refresh attempt
    /// then fails with a missing refresh token until one is seeded.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credentials: Credentials = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                has_access = credentials.access().is_some(),
                has_refresh = credentials.refresh().is_some(),
                "loaded credentials"
            );
            credentials
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let credentials = Credentials::default();
            write_atomic(&path, &credentials).await?;
            credentials
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Install a refresh token obtained out of band (e.g. from the environment
    /// at startup) and persist it.
    pub async fn seed_refresh_token(&self, token: &Secret<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.refresh_token = Some(token.expose().clone());
        debug!("seeded refresh token");
        write_atomic(&self.path, &state).await
    }

    /// Snapshot of the stored pair.
    pub async fn credentials(&self) -> Credentials {
        self.state.lock().await.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.access() })
    }

    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.refresh() })
    }

    fn set_access_token(&self, token: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.access_token = Some(token);
            debug!("updated access token");
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write the token pair to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains bearer tokens.
async fn write_atomic(path: &Path, data: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
