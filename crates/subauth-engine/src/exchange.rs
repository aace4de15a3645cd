//! Token endpoint exchanges.
//!
//! [`TokenExchanger`] is the seam between the credential store and the
//! network. [`HttpTokenExchanger`] talks to the provider's token endpoint
//! with form-encoded bodies; tests substitute their own implementation.
//!
//! A rejected grant is an expected outcome ([`TokenResult::Failed`]), not an
//! error. Errors are reserved for transport failures.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::oauth::OAuthConfig;

/// Tokens granted by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when a refresh response does not rotate the refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_at", &self.expires_at)
            .field("rotated_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Outcome of a token endpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenResult {
    Success(TokenGrant),
    /// Non-2xx or unparseable response. The provider's error text is
    /// deliberately not carried.
    Failed,
}

/// Performs the code and refresh grants.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code and its PKCE verifier for tokens.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResult>;

    /// Obtain a new access token with a refresh token.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResult>;
}

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    /// Convert into a [`TokenGrant`], computing `expires_at` from
    /// `expires_in` relative to `now`.
    ///
    /// Returns `None` when `expires_in` is not positive or the expiry is
    /// past the representable range.
    fn into_grant(self, now: DateTime<Utc>) -> Option<TokenGrant> {
        if self.expires_in <= 0 {
            return None;
        }
        let expires_at = now.checked_add_signed(Duration::try_seconds(self.expires_in)?)?;
        Some(TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP exchanger
// ---------------------------------------------------------------------------

/// Overall deadline for one token endpoint call.
const TOKEN_REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// [`TokenExchanger`] backed by `reqwest`.
pub struct HttpTokenExchanger {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl HttpTokenExchanger {
    /// Create an exchanger for the given configuration.
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_timeout(config, TOKEN_REQUEST_TIMEOUT)
    }

    /// Create an exchanger whose token calls give up after `timeout`.
    pub fn with_timeout(config: OAuthConfig, timeout: StdDuration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self { config, client }
    }

    /// Create an exchanger sharing an existing HTTP client.
    ///
    /// The client's own timeout settings apply.
    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    async fn post(&self, grant_type: &str, params: &[(&str, &str)]) -> Result<TokenResult> {
        let mut form = vec![
            ("grant_type", grant_type),
            ("client_id", self.config.client_id.as_str()),
        ];
        form.extend_from_slice(params);

        tracing::debug!(token_url = %self.config.token_url, grant_type, "calling token endpoint");

        let response = self
            .client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), grant_type, "token endpoint rejected grant");
            return Ok(TokenResult::Failed);
        }

        let body = response.text().await?;
        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(parsed) => {
                let expires_in = parsed.expires_in;
                match parsed.into_grant(Utc::now()) {
                    Some(grant) => {
                        tracing::debug!(grant_type, "token exchange successful");
                        Ok(TokenResult::Success(grant))
                    }
                    None => {
                        tracing::warn!(expires_in, grant_type, "token response has unusable expires_in");
                        Ok(TokenResult::Failed)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, grant_type, "malformed token response");
                Ok(TokenResult::Failed)
            }
        }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResult> {
        let redirect_uri = self.config.redirect_uri();
        let result = self
            .post(
                "authorization_code",
                &[
                    ("code", code),
                    ("code_verifier", code_verifier),
                    ("redirect_uri", redirect_uri.as_str()),
                ],
            )
            .await?;

        // The initial grant must start a refresh-token chain.
        Ok(match result {
            TokenResult::Success(grant) if grant.refresh_token.is_none() => {
                tracing::warn!("authorization code grant returned no refresh token");
                TokenResult::Failed
            }
            other => other,
        })
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResult> {
        self.post("refresh_token", &[("refresh_token", refresh_token)])
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
