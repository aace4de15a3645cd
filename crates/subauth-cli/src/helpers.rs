//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, manager construction, and status
//! reporting.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use subauth_config::Settings;
use subauth_engine::{AuthFailure, AuthManager, AuthState};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so that `subauth token` output stays pipeable.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Build an [`AuthManager`] persisting to the configured credential file.
pub fn build_manager(settings: &Settings) -> Result<AuthManager> {
    let persistence = Arc::new(settings.credential_store());
    AuthManager::new(settings.oauth.clone(), persistence)
        .context("failed to initialize the auth manager")
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// What `subauth status` reports.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub authenticated: bool,
    pub account_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub requires_reauthentication: bool,
    pub error: Option<AuthFailure>,
    pub credentials_path: String,
}

impl StatusReport {
    pub fn new(state: &AuthState, settings: &Settings, now: DateTime<Utc>) -> Self {
        let credentials = state.credentials.as_ref();
        Self {
            authenticated: state.is_authenticated,
            account_id: state.account_id().map(str::to_string),
            expires_at: credentials.map(|c| c.expires_at),
            expired: credentials.is_some_and(|c| c.expires_at <= now),
            last_refresh: credentials.and_then(|c| c.last_refresh),
            requires_reauthentication: state.requires_reauthentication(),
            error: state.error.clone(),
            credentials_path: settings.credentials_path.display().to_string(),
        }
    }

    /// Human-readable rendering, one field per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("\n  subauth Status\n  ==============\n\n");

        if self.authenticated {
            let account = self.account_id.as_deref().unwrap_or("unknown");
            out.push_str(&format!("  Logged in:        yes (account {account})\n"));
        } else {
            out.push_str("  Logged in:        no (run `subauth login`)\n");
        }

        if let Some(expires_at) = self.expires_at {
            let suffix = if self.expired { " (expired)" } else { "" };
            out.push_str(&format!(
                "  Token expires:    {}{suffix}\n",
                expires_at.to_rfc3339()
            ));
        }
        if let Some(last_refresh) = self.last_refresh {
            out.push_str(&format!(
                "  Last refresh:     {}\n",
                last_refresh.to_rfc3339()
            ));
        }
        if self.requires_reauthentication {
            out.push_str("  Action required:  sign in again with `subauth login`\n");
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("  Last error:       {error}\n"));
        }
        out.push_str(&format!("  Credentials:      {}\n", self.credentials_path));
        out
    }
}
