//! High-level authentication manager.
//!
//! [`AuthManager`] is the entry point for consuming code: the CLI and the
//! assistant's request layer. It wires the HTTP token exchanger to a
//! [`CredentialStore`] and adds request-header assembly on top.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::credential::{AuthState, Credential, CredentialPersistence};
use crate::error::{AuthEngineError, AuthFailure, FailureKind, Result};
use crate::exchange::{HttpTokenExchanger, TokenExchanger};
use crate::oauth::OAuthConfig;
use crate::store::CredentialStore;

/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct AuthManager {
    store: CredentialStore,
}

impl AuthManager {
    /// Create a manager that exchanges tokens over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidConfig`] if the configuration is
    /// unusable.
    pub fn new(config: OAuthConfig, persistence: Arc<dyn CredentialPersistence>) -> Result<Self> {
        config.validate()?;
        let exchanger = Arc::new(HttpTokenExchanger::new(config.clone()));
        Ok(Self::with_exchanger(config, exchanger, persistence))
    }

    /// Create a manager with a caller-supplied exchanger.
    pub fn with_exchanger(
        config: OAuthConfig,
        exchanger: Arc<dyn TokenExchanger>,
        persistence: Arc<dyn CredentialPersistence>,
    ) -> Self {
        Self {
            store: CredentialStore::new(config, exchanger, persistence),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        self.store.config()
    }

    /// Run the interactive login. See [`CredentialStore::start_oauth_flow`].
    pub async fn start_oauth_flow<F>(&self, on_url_ready: F) -> Option<Credential>
    where
        F: FnOnce(&str) + Send,
    {
        self.store.start_oauth_flow(on_url_ready).await
    }

    pub fn auth_state(&self) -> AuthState {
        self.store.auth_state()
    }

    /// See [`CredentialStore::valid_access_token`].
    pub async fn valid_access_token(&self) -> std::result::Result<String, AuthFailure> {
        self.store.valid_access_token().await
    }

    /// Headers for an API request: the bearer token plus the account id.
    ///
    /// # Errors
    ///
    /// Propagates [`valid_access_token`](Self::valid_access_token) failures.
    pub async fn authorization_headers(&self) -> std::result::Result<HeaderMap, AuthFailure> {
        let token = self.valid_access_token().await?;
        let account_id = self
            .auth_state()
            .account_id()
            .map(str::to_string)
            .ok_or_else(|| AuthFailure::from(AuthEngineError::NotAuthenticated))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);

        let name = HeaderName::from_bytes(self.config().account_id_header.as_bytes())
            .map_err(|e| AuthFailure::new(FailureKind::Internal, format!("invalid header name: {e}")))?;
        headers.insert(name, header_value(&account_id)?);

        Ok(headers)
    }

    /// Abandon a login in progress and release the callback port.
    pub async fn cancel_login(&self) {
        self.store.close_session().await;
    }

    /// Forget the credential.
    ///
    /// # Errors
    ///
    /// Returns the persistence error if the stored credential could not be
    /// removed.
    pub async fn logout(&self) -> Result<()> {
        self.store.logout().await
    }
}

fn header_value(value: &str) -> std::result::Result<HeaderValue, AuthFailure> {
    let mut value = HeaderValue::from_str(value).map_err(|e| {
        AuthFailure::new(FailureKind::Internal, format!("invalid header value: {e}"))
    })?;
    value.set_sensitive(true);
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::credential::InMemoryPersistence;
    use crate::exchange::TokenResult;

    struct RejectingExchanger;

    #[async_trait]
    impl TokenExchanger for RejectingExchanger {
        async fn exchange_code(&self, _code: &str, _verifier: &str) -> Result<TokenResult> {
            Ok(TokenResult::Failed)
        }

        async fn exchange_refresh_token(&self, _refresh_token: &str) -> Result<TokenResult> {
            Ok(TokenResult::Failed)
        }
    }

    fn manager_with(credential: Option<Credential>) -> AuthManager {
        let persistence: Arc<dyn CredentialPersistence> = Arc::new(match credential {
            Some(c) => InMemoryPersistence::with_credential(c),
            None => InMemoryPersistence::default(),
        });
        AuthManager::with_exchanger(
            OAuthConfig::default(),
            Arc::new(RejectingExchanger),
            persistence,
        )
    }

    fn fresh_credential() -> Credential {
        let payload = serde_json::json!({
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct_9" }
        });
        Credential {
            access_token: format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload.to_string())),
            refresh_token: "ref".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            account_id: "acct_9".to_string(),
            last_refresh: None,
        }
    }

    #[tokio::test]
    async fn headers_carry_bearer_and_account_id() {
        let credential = fresh_credential();
        let manager = manager_with(Some(credential.clone()));

        let headers = manager.authorization_headers().await.unwrap();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            format!("Bearer {}", credential.access_token)
        );
        assert_eq!(
            headers.get("chatgpt-account-id").unwrap().to_str().unwrap(),
            "acct_9"
        );
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[tokio::test]
    async fn headers_require_login() {
        let manager = manager_with(None);
        let err = manager.authorization_headers().await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NotAuthenticated);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = OAuthConfig {
            client_id: String::new(),
            ..OAuthConfig::default()
        };
        let result = AuthManager::new(config, Arc::new(InMemoryPersistence::default()));
        assert!(matches!(result, Err(AuthEngineError::InvalidConfig { .. })));
    }

    #[test]
    fn clones_share_state() {
        let manager = manager_with(Some(fresh_credential()));
        let other = manager.clone();
        assert_eq!(other.auth_state().account_id(), Some("acct_9"));
    }
}
