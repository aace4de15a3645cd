//! Settings and on-disk credential persistence for subauth.
//!
//! [`Settings`] resolves the engine's [`OAuthConfig`](subauth_engine::OAuthConfig)
//! from defaults, a TOML file, and `SUBAUTH_*` environment variables.
//! [`FileCredentialStore`] keeps the credential in a private JSON file across
//! process restarts.

pub mod credentials;
pub mod error;
pub mod paths;
pub mod settings;

pub use credentials::FileCredentialStore;
pub use error::{ConfigError, Result};
pub use settings::Settings;
