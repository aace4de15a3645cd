//! Subscription OAuth engine for subauth.
//!
//! This crate manages the credential lifecycle that lets a terminal coding
//! assistant call a provider API on behalf of a consumer subscription
//! instead of an API key:
//!
//! - **OAuth 2.0 Authorization Code Flow** with PKCE (RFC 7636)
//! - **Local callback listener** on a fixed loopback port
//! - **Identity extraction** from the access token's claims
//! - **Token lifecycle**: persistence, proactive refresh, logout
//!
//! Concurrent callers that find an expiring token share one refresh call.
//!
//! # Architecture
//!
//! ```text
//! AuthManager
//! └── CredentialStore        (owns the credential, coordinates refresh)
//!     ├── AuthorizationFlow  (PKCE pair + state + URL)
//!     ├── ListenerSession    (loopback redirect listener)
//!     ├── TokenExchanger     (code and refresh grants)
//!     └── CredentialPersistence
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use subauth_engine::{AuthManager, InMemoryPersistence, OAuthConfig};
//!
//! # async fn example() -> subauth_engine::error::Result<()> {
//! let manager = AuthManager::new(
//!     OAuthConfig::default(),
//!     Arc::new(InMemoryPersistence::default()),
//! )?;
//!
//! let credential = manager
//!     .start_oauth_flow(|url| println!("open {url} to sign in"))
//!     .await;
//!
//! if credential.is_some() {
//!     let token = manager.valid_access_token().await;
//!     println!("authenticated: {}", token.is_ok());
//! }
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod credential;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod manager;
pub mod oauth;
pub mod pkce;
pub mod store;

// Re-export key types at the crate root for convenience.
pub use callback::{AuthorizationCode, ListenerSession};
pub use credential::{AuthState, Credential, CredentialPersistence, InMemoryPersistence};
pub use error::{AuthEngineError, AuthFailure, FailureKind};
pub use exchange::{HttpTokenExchanger, TokenExchanger, TokenGrant, TokenResult};
pub use manager::AuthManager;
pub use oauth::{AuthorizationFlow, OAuthConfig};
pub use pkce::PkcePair;
pub use store::CredentialStore;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_available() {
        let config = OAuthConfig::default();
        assert_eq!(config.client_id, oauth::DEFAULT_CLIENT_ID);
        let _: fn() -> AuthState = AuthState::default;
    }

    #[test]
    fn failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::RefreshFailed).unwrap();
        assert_eq!(json, "\"refresh_failed\"");

        let kind: FailureKind = serde_json::from_str("\"port_in_use\"").unwrap();
        assert_eq!(kind, FailureKind::PortInUse);
    }
}
