//! Error types for the auth engine crate.
//!
//! Component-level operations surface errors through [`AuthEngineError`].
//! The credential store collapses those into an [`AuthFailure`], a cloneable
//! record of *what kind* of failure happened plus a human-readable message.
//! That record is what the presentation layer displays and what every waiter
//! on a shared refresh receives.

use serde::{Deserialize, Serialize};

/// Unified error type for the subauth engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthEngineError {
    /// The fixed callback port is already bound, most likely by another
    /// login in progress.
    #[error(
        "port {port} is already in use; finish or cancel the other login attempt and try again"
    )]
    PortInUse {
        /// The port we tried to bind.
        port: u16,
    },

    /// The local callback server timed out waiting for the redirect.
    #[error("no browser callback arrived within {timeout_secs} seconds; run login again")]
    CallbackTimeout {
        /// How many seconds we waited before giving up.
        timeout_secs: u64,
    },

    /// The login was cancelled, either by the authorization server or by
    /// closing the listener session.
    #[error("login cancelled: {reason}")]
    Cancelled {
        /// Why the attempt ended.
        reason: String,
    },

    /// The `state` returned on the callback does not match the one we sent.
    #[error("callback state did not match this login attempt; possible CSRF, login rejected")]
    StateMismatch,

    /// The callback request carried no authorization code.
    #[error("callback did not include an authorization code")]
    MissingCode,

    /// The authorization code could not be exchanged for tokens.
    #[error("token exchange failed; the authorization code was rejected")]
    ExchangeFailed,

    /// The access token does not carry an account identifier claim.
    #[error("access token does not contain an account id")]
    NoAccountId,

    /// The refresh grant was rejected; the user must log in again.
    #[error("token refresh failed, re-authentication required: {reason}")]
    RefreshFailed {
        /// Explanation of the rejection.
        reason: String,
    },

    /// A refreshed token belongs to a different account than the stored one.
    #[error("refreshed token belongs to account {actual}, expected {expected}")]
    AccountMismatch {
        /// The account id held before the refresh.
        expected: String,
        /// The account id carried by the refreshed token.
        actual: String,
    },

    /// No credential is stored.
    #[error("not logged in")]
    NotAuthenticated,

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The persistence collaborator failed to load or save a credential.
    #[error("credential persistence failed: {reason}")]
    Persistence {
        /// Details from the persistence backend.
        reason: String,
    },

    /// The system CSPRNG failed.
    #[error("secure random generation failed")]
    Entropy,

    /// An HTTP request to the authorization server failed in transport.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (e.g. from the callback TCP listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthEngineError {
    /// Classify this error into the failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PortInUse { .. } => FailureKind::PortInUse,
            Self::CallbackTimeout { .. } => FailureKind::Timeout,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::StateMismatch => FailureKind::StateMismatch,
            Self::MissingCode => FailureKind::MissingCode,
            Self::ExchangeFailed => FailureKind::ExchangeFailed,
            Self::NoAccountId => FailureKind::NoAccountId,
            Self::RefreshFailed { .. } => FailureKind::RefreshFailed,
            Self::AccountMismatch { .. } => FailureKind::AccountMismatch,
            Self::NotAuthenticated => FailureKind::NotAuthenticated,
            Self::NetworkError(_) => FailureKind::Network,
            Self::InvalidConfig { .. }
            | Self::Persistence { .. }
            | Self::Entropy
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::UrlParse(_) => FailureKind::Internal,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthEngineError>;

// ---------------------------------------------------------------------------
// Failure records
// ---------------------------------------------------------------------------

/// Coarse classification of an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PortInUse,
    Timeout,
    Cancelled,
    StateMismatch,
    MissingCode,
    ExchangeFailed,
    NoAccountId,
    RefreshFailed,
    AccountMismatch,
    NotAuthenticated,
    Network,
    Internal,
}

impl FailureKind {
    /// Whether recovering from this failure requires the user to go through
    /// the interactive login again (as opposed to simply retrying).
    pub fn requires_reauthentication(self) -> bool {
        matches!(self, Self::RefreshFailed | Self::AccountMismatch)
    }
}

/// A recorded authentication failure, as exposed through
/// [`AuthState::error`](crate::credential::AuthState::error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct AuthFailure {
    /// What kind of failure this is.
    pub kind: FailureKind,
    /// Human-readable message suitable for display.
    pub message: String,
}

impl AuthFailure {
    /// Create a failure record.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`FailureKind::requires_reauthentication`].
    pub fn requires_reauthentication(&self) -> bool {
        self.kind.requires_reauthentication()
    }
}

impl From<AuthEngineError> for AuthFailure {
    fn from(err: AuthEngineError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
