//! Configuration error types.
//!
//! Settings loading and on-disk credential persistence surface errors through
//! [`ConfigError`]. When a [`FileCredentialStore`](crate::FileCredentialStore)
//! is used through the engine's persistence trait, these errors are carried
//! as the engine's persistence failure with the message intact.

use std::path::PathBuf;

/// Unified error type for subauth configuration and storage.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    // -- Settings errors ----------------------------------------------------
    /// The settings file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`Settings`](crate::Settings).
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A setting has an unusable value.
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    /// No home directory could be determined for the default data location.
    #[error("cannot determine the home directory; set SUBAUTH_HOME")]
    NoHomeDir,

    // -- Credential file errors ---------------------------------------------
    /// The credential file exists but does not hold a credential.
    #[error("credential file {} is corrupt: {source}", path.display())]
    CorruptCredentials {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The credential file could not be written or removed.
    #[error("failed to write credential file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -- Wrapped errors -----------------------------------------------------
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ConfigError>;
