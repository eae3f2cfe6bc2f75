//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The refresh token seed is loaded from AUTH_PROXY_REFRESH_TOKEN or
//! refresh_token_file, never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use session_auth::{DEFAULT_LOGIN_ROUTE, DEFAULT_REFRESH_PATH};

/// Env var holding a refresh token to seed the credential store with.
pub const REFRESH_TOKEN_ENV: &str = "AUTH_PROXY_REFRESH_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Session refresh settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// 0 disables the bound.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    /// Path to a file containing a refresh token (alternative to the env var)
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            refresh_path: default_refresh_path(),
            login_route: default_login_route(),
            refresh_timeout_secs: default_refresh_timeout(),
            refresh_token_file: None,
            refresh_token: None,
        }
    }
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Option<Duration> {
        match self.refresh_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_login_route() -> String {
    DEFAULT_LOGIN_ROUTE.to_string()
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Refresh token resolution order:
    /// 1. AUTH_PROXY_REFRESH_TOKEN env var
    /// 2. refresh_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.proxy.upstream_url.starts_with("http://")
            && !config.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.proxy.upstream_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !config.auth.login_route.starts_with('/') {
            return Err(common::Error::Config(format!(
                "login_route must be an absolute path, got: {}",
                config.auth.login_route
            )));
        }

        if config.auth.refresh_path.trim_matches('/').is_empty() {
            return Err(common::Error::Config("refresh_path must not be empty".into()));
        }

        // A set but blank env var does not shadow the token file.
        let env_token = std::env::var(REFRESH_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        if let Some(token) = env_token {
            config.auth.refresh_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.auth.refresh_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read refresh_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.auth.refresh_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-proxy.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    const MINIMAL: &str = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"
"#;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("auth-proxy.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load(&write_config(&dir, MINIMAL)).unwrap();

        assert_eq!(config.proxy.upstream_url, "https://api.example.com");
        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(config.auth.credentials_path, PathBuf::from("credentials.json"));
        assert_eq!(config.auth.refresh_path, "refresh");
        assert_eq!(config.auth.login_route, "/auth/login");
        assert_eq!(config.auth.refresh_timeout(), Some(Duration::from_secs(30)));
        assert!(config.auth.refresh_token.is_none());
    }

    #[test]
    fn auth_section_overrides_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{MINIMAL}\n[auth]\ncredentials_path = \"/var/lib/auth-proxy/creds.json\"\nrefresh_path = \"v2/session/refresh\"\nlogin_route = \"/signin\"\nrefresh_timeout_secs = 0\n"
        );

        let config = Config::load(&write_config(&dir, &contents)).unwrap();

        assert_eq!(
            config.auth.credentials_path,
            PathBuf::from("/var/lib/auth-proxy/creds.json")
        );
        assert_eq!(config.auth.refresh_path, "v2/session/refresh");
        assert_eq!(config.auth.login_route, "/signin");
        assert_eq!(config.auth.refresh_timeout(), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/path/config.toml")).is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(&dir, "not valid {{{{ toml"));
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn refresh_token_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);

        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };

        assert_eq!(config.auth.refresh_token.as_ref().unwrap().expose(), "rt-env");
    }

    #[test]
    fn refresh_token_from_file_is_trimmed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("refresh_token");
        std::fs::write(&token_path, "rt-file\n").unwrap();
        let contents = format!(
            "{MINIMAL}\n[auth]\nrefresh_token_file = \"{}\"\n",
            token_path.display()
        );

        let config = Config::load(&write_config(&dir, &contents)).unwrap();

        assert_eq!(config.auth.refresh_token.as_ref().unwrap().expose(), "rt-file");
    }

    #[test]
    fn env_overrides_missing_token_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{MINIMAL}\n[auth]\nrefresh_token_file = \"/nonexistent/refresh_token\"\n"
        );
        let path = write_config(&dir, &contents);

        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env-wins") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };

        assert_eq!(
            config.auth.refresh_token.as_ref().unwrap().expose(),
            "rt-env-wins"
        );
    }

    #[test]
    fn empty_env_falls_back_to_token_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("refresh_token");
        std::fs::write(&token_path, "rt-file").unwrap();
        let contents = format!(
            "{MINIMAL}\n[auth]\nrefresh_token_file = \"{}\"\n",
            token_path.display()
        );
        let path = write_config(&dir, &contents);

        unsafe { set_env(REFRESH_TOKEN_ENV, "  ") };
        let config = Config::load(&path);
        unsafe { remove_env(REFRESH_TOKEN_ENV) };

        assert_eq!(
            config.unwrap().auth.refresh_token.as_ref().unwrap().expose(),
            "rt-file"
        );
    }

    #[test]
    fn missing_token_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{MINIMAL}\n[auth]\nrefresh_token_file = \"/nonexistent/refresh_token\"\n"
        );

        let err = Config::load(&write_config(&dir, &contents)).unwrap_err();
        assert!(err.to_string().contains("refresh_token_file"));
    }

    #[test]
    fn whitespace_token_file_yields_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(REFRESH_TOKEN_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("refresh_token");
        std::fs::write(&token_path, "  \n  ").unwrap();
        let contents = format!(
            "{MINIMAL}\n[auth]\nrefresh_token_file = \"{}\"\n",
            token_path.display()
        );

        let config = Config::load(&write_config(&dir, &contents)).unwrap();
        assert!(config.auth.refresh_token.is_none());
    }

    #[test]
    fn upstream_without_scheme_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "api.example.com"
"#;
        let err = Config::load(&write_config(&dir, contents)).unwrap_err();
        assert!(err.to_string().contains("upstream_url must start with http"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!("{MINIMAL}timeout_secs = 0\n");
        assert!(Config::load(&write_config(&dir, &contents)).is_err());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!("{MINIMAL}max_connections = 0\n");
        assert!(Config::load(&write_config(&dir, &contents)).is_err());
    }

    #[test]
    fn relative_login_route_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!("{MINIMAL}\n[auth]\nlogin_route = \"auth/login\"\n");
        let err = Config::load(&write_config(&dir, &contents)).unwrap_err();
        assert!(err.to_string().contains("login_route"));
    }

    #[test]
    fn empty_refresh_path_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!("{MINIMAL}\n[auth]\nrefresh_path = \"/\"\n");
        assert!(Config::load(&write_config(&dir, &contents)).is_err());
    }

    #[test]
    fn resolve_path_prefers_cli() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
    }

    #[test]
    fn resolve_path_env_then_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("auth-proxy.toml"));
    }
}
