//! CLI entry point for subauth.
//!
//! This binary provides the `subauth` command with subcommands for signing
//! in, inspecting the login state, printing a fresh token, and signing out.

mod cli;
mod helpers;

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use clap::Parser;
use subauth_config::Settings;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::helpers::{StatusReport, build_manager, init_tracing};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Login { .. } => "info",
        _ => "warn",
    };
    init_tracing(default_level, cli.log_json);

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Commands::Login { no_browser } => cmd_login(&settings, no_browser).await,
        Commands::Status { json } => cmd_status(&settings, json),
        Commands::Token { headers } => cmd_token(&settings, headers).await,
        Commands::Logout => cmd_logout(&settings).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: login
// ---------------------------------------------------------------------------

async fn cmd_login(settings: &Settings, no_browser: bool) -> Result<()> {
    let manager = build_manager(settings)?;

    let login = manager.start_oauth_flow(|url| {
        println!();
        println!("  Open this URL in your browser to sign in:");
        println!();
        println!("  {url}");
        println!();

        if !no_browser {
            if let Err(e) = open::that(url) {
                warn!(error = %e, "failed to open browser");
                println!("  Could not open a browser; copy the URL above instead.");
            }
        }
        println!(
            "  Waiting for the browser to redirect (up to {} seconds)...",
            settings.oauth.callback_timeout_secs
        );
    });

    let credential = tokio::select! {
        credential = login => credential,
        _ = tokio::signal::ctrl_c() => {
            manager.cancel_login().await;
            bail!("login cancelled");
        }
    };

    match credential {
        Some(credential) => {
            info!(account_id = %credential.account_id, "logged in");
            println!();
            println!("  Signed in as account {}", credential.account_id);
            println!("  Credentials saved to {}", settings.credentials_path.display());
            println!();
            Ok(())
        }
        None => {
            let reason = manager
                .auth_state()
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("login failed: {reason}");
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

fn cmd_status(settings: &Settings, json: bool) -> Result<()> {
    let manager = build_manager(settings)?;
    let report = StatusReport::new(&manager.auth_state(), settings, chrono::Utc::now());

    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to encode status")?;
        println!("{out}");
    } else {
        println!("{}", report.render());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: token
// ---------------------------------------------------------------------------

async fn cmd_token(settings: &Settings, headers: bool) -> Result<()> {
    let manager = build_manager(settings)?;

    if headers {
        let map = manager.authorization_headers().await?;
        let printable: BTreeMap<&str, &str> = map
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect();
        let out = serde_json::to_string_pretty(&printable).context("failed to encode headers")?;
        println!("{out}");
    } else {
        let token = manager.valid_access_token().await?;
        println!("{token}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: logout
// ---------------------------------------------------------------------------

async fn cmd_logout(settings: &Settings) -> Result<()> {
    let manager = build_manager(settings)?;
    let was_logged_in = manager.auth_state().is_authenticated;

    manager.logout().await.context("failed to clear credentials")?;

    if was_logged_in {
        println!("  Signed out. Removed {}", settings.credentials_path.display());
    } else {
        println!("  Not signed in.");
    }
    Ok(())
}
