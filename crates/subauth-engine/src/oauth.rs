//! OAuth 2.0 Authorization Code Flow configuration and authorization URLs.
//!
//! # Flow Overview
//!
//! 1. Generate a PKCE code verifier and code challenge.
//! 2. Build an authorization URL and hand it to the user.
//! 3. Receive the authorization code via the local callback.
//! 4. Exchange the code + verifier for tokens.
//! 5. Refresh tokens when they expire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthEngineError, Result};
use crate::pkce::{self, CHALLENGE_METHOD, PkcePair};

/// Public client id of the Codex CLI subscription login.
pub const DEFAULT_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

/// Authorization endpoint of the subscription provider.
pub const DEFAULT_AUTH_URL: &str = "https://auth.openai.com/oauth/authorize";

/// Token endpoint of the subscription provider.
pub const DEFAULT_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";

/// Fixed loopback port registered for the redirect URI.
pub const DEFAULT_CALLBACK_PORT: u16 = 1455;

/// Redirect path registered for the redirect URI.
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";

/// Default timeout for the callback server in seconds (5 minutes).
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Tokens this close to expiry are treated as stale.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

/// Upper bound for `refresh_margin_secs`: one day.
pub const MAX_REFRESH_MARGIN_SECS: i64 = 86_400;

/// Claim namespace holding the account id in the access token payload.
pub const DEFAULT_ACCOUNT_CLAIM_NAMESPACE: &str = "https://api.openai.com/auth";

/// Claim key under [`DEFAULT_ACCOUNT_CLAIM_NAMESPACE`].
pub const DEFAULT_ACCOUNT_CLAIM_FIELD: &str = "chatgpt_account_id";

/// Header the request pipeline uses to present the account id.
pub const DEFAULT_ACCOUNT_ID_HEADER: &str = "chatgpt-account-id";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the subscription OAuth flow.
///
/// Every field has a default, so a partial TOML table deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// The OAuth client ID (public client, no secret).
    pub client_id: String,

    /// The authorization endpoint URL.
    pub auth_url: String,

    /// The token endpoint URL.
    pub token_url: String,

    /// Host used in the redirect URI. The listener always binds loopback.
    pub redirect_host: String,

    /// Local port the callback listener binds.
    pub callback_port: u16,

    /// Path the provider redirects to.
    pub callback_path: String,

    /// The scopes to request.
    pub scopes: Vec<String>,

    /// Provider-specific parameters appended to the authorization URL.
    pub extra_auth_params: BTreeMap<String, String>,

    /// Nested claim path from the token payload root to the account id.
    pub account_id_claim: Vec<String>,

    /// Header name used to present the account id on API requests.
    pub account_id_header: String,

    /// How long to wait for the browser redirect.
    pub callback_timeout_secs: u64,

    /// Safety margin before `expires_at` at which tokens are refreshed.
    pub refresh_margin_secs: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        let extra_auth_params = [
            ("id_token_add_organizations", "true"),
            ("codex_cli_simplified_flow", "true"),
            ("originator", "subauth"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            redirect_host: "localhost".to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            scopes: ["openid", "profile", "email", "offline_access"]
                .into_iter()
                .map(String::from)
                .collect(),
            extra_auth_params,
            account_id_claim: vec![
                DEFAULT_ACCOUNT_CLAIM_NAMESPACE.to_string(),
                DEFAULT_ACCOUNT_CLAIM_FIELD.to_string(),
            ],
            account_id_header: DEFAULT_ACCOUNT_ID_HEADER.to_string(),
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
        }
    }
}

impl OAuthConfig {
    /// The redirect URI registered with the authorization server.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.redirect_host, self.callback_port, self.callback_path
        )
    }

    /// Check the configuration for values that would make every login fail.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidConfig`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(invalid("client_id must not be empty"));
        }
        for (name, value) in [("auth_url", &self.auth_url), ("token_url", &self.token_url)] {
            Url::parse(value).map_err(|e| invalid(format!("{name} is not a valid URL: {e}")))?;
        }
        if !self.callback_path.starts_with('/') {
            return Err(invalid("callback_path must start with '/'"));
        }
        if self.account_id_claim.is_empty() {
            return Err(invalid("account_id_claim must name at least one key"));
        }
        if self.callback_timeout_secs == 0 {
            return Err(invalid("callback_timeout_secs must be positive"));
        }
        if !(0..=MAX_REFRESH_MARGIN_SECS).contains(&self.refresh_margin_secs) {
            return Err(invalid(format!(
                "refresh_margin_secs must be between 0 and {MAX_REFRESH_MARGIN_SECS}"
            )));
        }
        Ok(())
    }

    /// Build the authorization URL the user should visit.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::UrlParse`] if `auth_url` is not a valid URL.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String> {
        let mut url = Url::parse(&self.auth_url)?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_uri());
            if !self.scopes.is_empty() {
                params.append_pair("scope", &self.scopes.join(" "));
            }
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("code_challenge_method", CHALLENGE_METHOD);
            params.append_pair("state", state);
            for (key, value) in &self.extra_auth_params {
                params.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }
}

fn invalid(reason: impl Into<String>) -> AuthEngineError {
    AuthEngineError::InvalidConfig {
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Flow context
// ---------------------------------------------------------------------------

/// Everything generated for one login attempt.
///
/// Dropped once the listener resolves, taking the verifier with it.
#[derive(Debug)]
pub struct AuthorizationFlow {
    pub pkce: PkcePair,
    pub state: String,
    pub url: String,
}

impl AuthorizationFlow {
    /// Generate PKCE material and state, and build the authorization URL.
    ///
    /// # Errors
    ///
    /// Fails if the CSPRNG fails or `auth_url` does not parse.
    pub fn begin(config: &OAuthConfig) -> Result<Self> {
        let pkce = pkce::generate()?;
        let state = pkce::generate_state()?;
        let url = config.authorization_url(&state, &pkce.challenge)?;
        Ok(Self { pkce, state, url })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
