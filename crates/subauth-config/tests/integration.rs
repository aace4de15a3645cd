//! Integration tests for the subauth-config crate.
//!
//! These tests resolve settings against a temporary home directory and run
//! the engine's credential store on top of the file-backed persistence.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use subauth_config::paths::HOME_ENV;
use subauth_config::settings::CREDENTIALS_PATH_ENV;
use subauth_config::{FileCredentialStore, Settings};
use subauth_engine::{AuthManager, Credential, CredentialPersistence, FailureKind};

fn env_with_home(home: &std::path::Path) -> impl Fn(&str) -> Option<String> {
    let mut map = HashMap::new();
    map.insert(HOME_ENV.to_string(), home.display().to_string());
    move |key| map.get(key).cloned()
}

fn credential(account: &str) -> Credential {
    let payload = serde_json::json!({
        "https://api.openai.com/auth": { "chatgpt_account_id": account }
    });
    Credential {
        access_token: format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload.to_string())),
        refresh_token: "ref".to_string(),
        expires_at: Utc::now() + Duration::hours(1),
        account_id: account.to_string(),
        last_refresh: Some(Utc::now()),
    }
}

#[tokio::test]
async fn credential_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_with(None, env_with_home(dir.path())).unwrap();
    assert_eq!(
        settings.credentials_path,
        dir.path().join("credentials.json")
    );

    let saved = credential("acct_disk");
    settings.credential_store().save(&saved).unwrap();

    // A new process: fresh settings, fresh store, fresh manager.
    let settings = Settings::load_with(None, env_with_home(dir.path())).unwrap();
    let manager =
        AuthManager::new(settings.oauth.clone(), Arc::new(settings.credential_store())).unwrap();

    let state = manager.auth_state();
    assert!(state.is_authenticated);
    assert_eq!(state.account_id(), Some("acct_disk"));
    assert_eq!(manager.valid_access_token().await.unwrap(), saved.access_token);

    manager.logout().await.unwrap();
    assert!(!settings.credentials_path.exists());
    assert!(!manager.auth_state().is_authenticated);
}

#[tokio::test]
async fn corrupt_credential_file_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("credentials.json"), "garbage").unwrap();

    let settings = Settings::load_with(None, env_with_home(dir.path())).unwrap();
    let manager =
        AuthManager::new(settings.oauth.clone(), Arc::new(settings.credential_store())).unwrap();

    let state = manager.auth_state();
    assert!(!state.is_authenticated);
    assert_eq!(state.error.unwrap().kind, FailureKind::Internal);

    let err = manager.valid_access_token().await.unwrap_err();
    assert_eq!(err.kind, FailureKind::NotAuthenticated);
}

#[test]
fn credentials_path_override_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let custom = dir.path().join("elsewhere").join("login.json");
    let mut map = HashMap::new();
    map.insert(HOME_ENV.to_string(), dir.path().display().to_string());
    map.insert(CREDENTIALS_PATH_ENV.to_string(), custom.display().to_string());

    let settings = Settings::load_with(None, move |key| map.get(key).cloned()).unwrap();
    let store = settings.credential_store();
    assert_eq!(store.path(), custom);

    store.save(&credential("acct_custom")).unwrap();
    let reread = FileCredentialStore::new(&custom).load().unwrap().unwrap();
    assert_eq!(reread.account_id, "acct_custom");
}
