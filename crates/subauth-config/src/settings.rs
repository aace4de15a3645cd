//! Settings loading.
//!
//! Resolution order, lowest to highest precedence:
//!
//! 1. Built-in defaults ([`OAuthConfig::default`]).
//! 2. The TOML settings file (`$SUBAUTH_HOME/config.toml` or an explicit
//!    path).
//! 3. `SUBAUTH_*` environment variables, including any loaded from `.env`.
//!
//! ```toml
//! credentials_path = "credentials.json"
//!
//! [oauth]
//! callback_timeout_secs = 120
//! refresh_margin_secs = 90
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use subauth_engine::{AuthEngineError, OAuthConfig};

use crate::credentials::FileCredentialStore;
use crate::error::{ConfigError, Result};
use crate::paths::{self, CONFIG_FILE_NAME, CREDENTIALS_FILE_NAME, HOME_ENV};

pub const CLIENT_ID_ENV: &str = "SUBAUTH_CLIENT_ID";
pub const AUTH_URL_ENV: &str = "SUBAUTH_AUTH_URL";
pub const TOKEN_URL_ENV: &str = "SUBAUTH_TOKEN_URL";
pub const CALLBACK_PORT_ENV: &str = "SUBAUTH_CALLBACK_PORT";
pub const CALLBACK_TIMEOUT_ENV: &str = "SUBAUTH_CALLBACK_TIMEOUT_SECS";
pub const CREDENTIALS_PATH_ENV: &str = "SUBAUTH_CREDENTIALS_PATH";

/// On-disk shape of the settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    credentials_path: Option<PathBuf>,
    oauth: OAuthConfig,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Data directory.
    pub home: PathBuf,
    /// Where the settings file was looked for.
    pub config_path: PathBuf,
    /// Whether that file existed.
    pub config_file_found: bool,
    /// Where the credential is persisted.
    pub credentials_path: PathBuf,
    /// Engine configuration after overrides.
    pub oauth: OAuthConfig,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// A `.env` file in the working directory is read first, without
    /// overriding variables that are already set.
    ///
    /// # Errors
    ///
    /// See [`load_with`](Self::load_with).
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env"),
        }
        Self::load_with(explicit_path, |key| std::env::var(key).ok())
    }

    /// Load settings, reading environment variables through `env`.
    ///
    /// A missing default settings file yields defaults; a missing explicit
    /// one is an error.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] or [`ConfigError::Parse`] for an unreadable
    ///   settings file.
    /// - [`ConfigError::Invalid`] for an override that does not parse or a
    ///   resulting configuration that fails validation.
    /// - [`ConfigError::NoHomeDir`] if no data directory can be determined.
    pub fn load_with<F>(explicit_path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = paths::resolve_home(env(HOME_ENV).as_deref())?;
        let config_path = explicit_path.map_or_else(|| home.join(CONFIG_FILE_NAME), Path::to_path_buf);

        let (file, config_file_found) = match std::fs::read_to_string(&config_path) {
            Ok(content) => {
                let file = toml::from_str::<SettingsFile>(&content).map_err(|source| {
                    ConfigError::Parse {
                        path: config_path.clone(),
                        source,
                    }
                })?;
                (file, true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit_path.is_none() => {
                tracing::debug!(path = %config_path.display(), "no config file, using defaults");
                (SettingsFile::default(), false)
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: config_path,
                    source,
                });
            }
        };

        let credentials_path = match non_empty(env(CREDENTIALS_PATH_ENV)) {
            Some(value) => PathBuf::from(value),
            None => file
                .credentials_path
                .map(|p| if p.is_relative() { home.join(p) } else { p })
                .unwrap_or_else(|| home.join(CREDENTIALS_FILE_NAME)),
        };

        let mut oauth = file.oauth;
        if let Some(value) = non_empty(env(CLIENT_ID_ENV)) {
            oauth.client_id = value;
        }
        if let Some(value) = non_empty(env(AUTH_URL_ENV)) {
            oauth.auth_url = value;
        }
        if let Some(value) = non_empty(env(TOKEN_URL_ENV)) {
            oauth.token_url = value;
        }
        if let Some(value) = non_empty(env(CALLBACK_PORT_ENV)) {
            oauth.callback_port = parse_env(CALLBACK_PORT_ENV, &value)?;
        }
        if let Some(value) = non_empty(env(CALLBACK_TIMEOUT_ENV)) {
            oauth.callback_timeout_secs = parse_env(CALLBACK_TIMEOUT_ENV, &value)?;
        }

        oauth.validate().map_err(|e| match e {
            AuthEngineError::InvalidConfig { reason } => ConfigError::Invalid { reason },
            other => ConfigError::invalid(other.to_string()),
        })?;

        tracing::debug!(
            home = %home.display(),
            credentials = %credentials_path.display(),
            config_file_found,
            "settings resolved"
        );

        Ok(Self {
            home,
            config_path,
            config_file_found,
            credentials_path,
            oauth,
        })
    }

    /// Persistence backed by [`credentials_path`](Self::credentials_path).
    pub fn credential_store(&self) -> FileCredentialStore {
        FileCredentialStore::new(&self.credentials_path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(format!("{key} has an invalid value: {value:?}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
