//! Default on-disk locations.

use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "SUBAUTH_HOME";

/// Directory name under the user's home directory.
pub const DEFAULT_DIR_NAME: &str = ".subauth";

/// Settings file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Credential file name inside the data directory.
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// `~/.subauth`.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if the platform reports no home
/// directory.
pub fn default_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DIR_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

/// Resolve the data directory from an optional `SUBAUTH_HOME` value.
pub fn resolve_home(override_value: Option<&str>) -> Result<PathBuf> {
    match override_value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => default_home(),
    }
}
