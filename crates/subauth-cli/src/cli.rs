//! CLI argument definitions for subauth.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// subauth -- subscription login for terminal coding assistants.
#[derive(Parser)]
#[command(
    name = "subauth",
    version,
    about = "subauth -- sign in with a consumer subscription instead of an API key",
    long_about = "Runs the browser-based OAuth login for a subscription account, keeps the \
                  resulting tokens fresh, and hands valid credentials to the assistant."
)]
pub struct Cli {
    /// Path to the settings file (defaults to $SUBAUTH_HOME/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in through the browser.
    Login {
        /// Print the authorization URL without opening a browser.
        #[arg(long)]
        no_browser: bool,
    },

    /// Show the current login state. Never contacts the network.
    Status {
        /// Print the state as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a valid access token, refreshing it first if needed.
    Token {
        /// Print the request headers as JSON instead of the bare token.
        #[arg(long)]
        headers: bool,
    },

    /// Forget the stored credentials.
    Logout,
}
