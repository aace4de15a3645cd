//! The persisted credential, the derived auth state, and the persistence
//! seam.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthEngineError, AuthFailure, Result};

/// The token pair and account identity for the logged-in subscription.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Short-lived bearer token presented on every API call.
    pub access_token: String,

    /// Long-lived token used to obtain new access tokens.
    pub refresh_token: String,

    /// When the access token expires, derived from `expires_in` at the
    /// moment of exchange or refresh.
    pub expires_at: DateTime<Utc>,

    /// Account identifier decoded from the access token's claims.
    pub account_id: String,

    /// When the token pair was last obtained from the token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Credential {
    /// Whether the access token is still usable `margin` ahead of `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now.checked_add_signed(margin).is_some_and(|deadline| deadline < self.expires_at)
    }

    /// [`is_fresh_at`](Self::is_fresh_at) against the current time.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.is_fresh_at(Utc::now(), margin)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &mask_token(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .field("last_refresh", &self.last_refresh)
            .finish()
    }
}

/// Shorten a token for display: first and last four characters only.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

// ---------------------------------------------------------------------------
// AuthState
// ---------------------------------------------------------------------------

/// Snapshot of the store, computed on demand and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    /// `true` iff a credential is held, whether or not it has expired.
    pub is_authenticated: bool,

    /// The held credential, if any.
    pub credentials: Option<Credential>,

    /// The most recent login or refresh failure, cleared on success.
    pub error: Option<AuthFailure>,
}

impl AuthState {
    /// The account id of the held credential.
    pub fn account_id(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.account_id.as_str())
    }

    /// Whether the user has to go through the interactive login again.
    ///
    /// Only true while a credential is still held; a user who never logged
    /// in is "not authenticated", not "reauthentication required".
    pub fn requires_reauthentication(&self) -> bool {
        self.is_authenticated
            && self
                .error
                .as_ref()
                .is_some_and(AuthFailure::requires_reauthentication)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Long-term owner of the credential across process restarts.
///
/// `save` must be durable by the time it returns.
pub trait CredentialPersistence: Send + Sync {
    /// Load the stored credential, `None` if nothing is stored.
    fn load(&self) -> Result<Option<Credential>>;

    /// Replace the stored credential.
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Remove the stored credential. Removing nothing is not an error.
    fn clear(&self) -> Result<()>;
}

/// Process-local persistence, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    slot: Mutex<Option<Credential>>,
}

impl InMemoryPersistence {
    /// Create persistence that already holds `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Credential>>> {
        self.slot.lock().map_err(|e| AuthEngineError::Persistence {
            reason: format!("in-memory credential lock poisoned: {e}"),
        })
    }
}

impl CredentialPersistence for InMemoryPersistence {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.lock()? = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.take();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
