//! Credential store and refresh coordinator.
//!
//! The [`CredentialStore`] exclusively owns the in-memory [`Credential`]. It
//! loads from the persistence collaborator on first access, persists after
//! every successful exchange or refresh before publishing the result, and
//! coordinates refreshes so that concurrent callers share one in-flight
//! network call.
//!
//! # Refresh coordination
//!
//! The in-flight refresh is memoized as a [`Shared`] future. A caller that
//! finds a stale token either installs a new shared refresh or attaches to
//! the one already installed. The refresh future clears the handle as it
//! settles, so a failed refresh can be retried by a later caller.
//!
//! Logout and login each start a new credential generation. A refresh
//! that settles after the generation it started from has ended discards its
//! result, so a late refresh can neither resurrect a logged-out credential
//! nor overwrite a newer login.
//!
//! State locks are held only for short synchronous sections, never across
//! an `.await`. The login gate is an async mutex that serializes replacing
//! the listener session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::callback::ListenerSession;
use crate::credential::{AuthState, Credential, CredentialPersistence};
use crate::error::{AuthEngineError, AuthFailure, FailureKind, Result};
use crate::exchange::{TokenExchanger, TokenGrant, TokenResult};
use crate::identity;
use crate::oauth::{AuthorizationFlow, OAuthConfig};

type SharedRefresh = Shared<BoxFuture<'static, std::result::Result<Credential, AuthFailure>>>;

/// Mutable state guarded by the store.
#[derive(Debug, Default)]
struct StoreState {
    loaded: bool,
    credential: Option<Credential>,
    error: Option<AuthFailure>,
    /// Bumped by logout and by a completed login.
    generation: u64,
}

struct Inner {
    config: OAuthConfig,
    exchanger: Arc<dyn TokenExchanger>,
    persistence: Arc<dyn CredentialPersistence>,
    state: RwLock<StoreState>,
    in_flight: Mutex<Option<SharedRefresh>>,
    session: Mutex<Option<Arc<ListenerSession>>>,
    login_gate: tokio::sync::Mutex<()>,
}

/// Owner of the current credential. Cloning yields another handle to the
/// same store.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

impl CredentialStore {
    /// Create a store. Nothing is loaded until first access.
    pub fn new(
        config: OAuthConfig,
        exchanger: Arc<dyn TokenExchanger>,
        persistence: Arc<dyn CredentialPersistence>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                exchanger,
                persistence,
                state: RwLock::new(StoreState::default()),
                in_flight: Mutex::new(None),
                session: Mutex::new(None),
                login_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &OAuthConfig {
        &self.inner.config
    }

    /// Current auth state. Never touches the network.
    pub fn auth_state(&self) -> AuthState {
        self.inner.ensure_loaded();
        let state = self.inner.read_state();
        AuthState {
            is_authenticated: state.credential.is_some(),
            credentials: state.credential.clone(),
            error: state.error.clone(),
        }
    }

    /// Return an access token that is not within the safety margin of its
    /// expiry, refreshing first if needed.
    ///
    /// # Errors
    ///
    /// - [`FailureKind::NotAuthenticated`] if no credential is held.
    /// - [`FailureKind::RefreshFailed`] if the refresh grant was rejected and
    ///   the user must log in again.
    /// - [`FailureKind::AccountMismatch`] if the refreshed token belongs to
    ///   another account.
    /// - [`FailureKind::Network`] on transport failure (retryable).
    pub async fn valid_access_token(&self) -> std::result::Result<String, AuthFailure> {
        self.inner.ensure_loaded();

        {
            let state = self.inner.read_state();
            match &state.credential {
                None => {
                    return Err(AuthEngineError::NotAuthenticated.into());
                }
                Some(credential) if credential.is_fresh(self.inner.margin()) => {
                    return Ok(credential.access_token.clone());
                }
                Some(_) => {}
            }
        }

        let refresh = self.inner.in_flight_refresh();
        refresh.await.map(|credential| credential.access_token)
    }

    /// Run the interactive login end to end.
    ///
    /// `on_url_ready` is called exactly once with the authorization URL so the
    /// caller can open a browser or print it. Returns `None` on any failure;
    /// the reason is recorded in [`AuthState::error`].
    pub async fn start_oauth_flow<F>(&self, on_url_ready: F) -> Option<Credential>
    where
        F: FnOnce(&str) + Send,
    {
        match self.run_oauth_flow(on_url_ready).await {
            Ok(credential) => {
                tracing::info!(account_id = %credential.account_id, "OAuth login completed");
                Some(credential)
            }
            Err(e) => {
                tracing::warn!(error = %e, "OAuth login failed");
                self.inner.record_failure(AuthFailure::from(e));
                None
            }
        }
    }

    /// Forget the credential, both in memory and in persistence.
    ///
    /// # Errors
    ///
    /// Returns the persistence error if the stored credential could not be
    /// removed; the in-memory credential is kept in that case.
    pub async fn logout(&self) -> Result<()> {
        self.close_session().await;

        let mut state = self.inner.write_state();
        self.inner.persistence.clear()?;
        state.loaded = true;
        state.credential = None;
        state.error = None;
        state.generation += 1;

        tracing::info!("credentials cleared");
        Ok(())
    }

    /// Close any listener session left open. Idempotent.
    pub async fn close_session(&self) {
        let previous = lock(&self.inner.session).take();
        if let Some(session) = previous {
            tracing::debug!(port = session.port(), "closing previous listener session");
            session.shutdown().await;
        }
    }

    async fn run_oauth_flow<F>(&self, on_url_ready: F) -> Result<Credential>
    where
        F: FnOnce(&str) + Send,
    {
        let config = &self.inner.config;
        tracing::info!("starting OAuth authorization code flow");

        // One login at a time per process: release the old socket first.
        // The gate covers close, bind and install so concurrent logins
        // cannot both find the slot empty.
        let gate = self.inner.login_gate.lock().await;
        self.close_session().await;

        let flow = AuthorizationFlow::begin(config)?;
        let session = Arc::new(
            ListenerSession::start(
                config.callback_port,
                config.callback_path.clone(),
                StdDuration::from_secs(config.callback_timeout_secs),
            )
            .await?,
        );
        *lock(&self.inner.session) = Some(Arc::clone(&session));
        drop(gate);

        tracing::debug!(url = %flow.url, "authorization URL ready");
        on_url_ready(&flow.url);

        let waited = session.wait_for_callback(&flow.state).await;
        {
            let mut slot = lock(&self.inner.session);
            if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &session)) {
                slot.take();
            }
        }
        let code = waited?;

        tracing::debug!("state parameter verified, exchanging code for tokens");
        let grant = match self
            .inner
            .exchanger
            .exchange_code(&code, &flow.pkce.verifier)
            .await?
        {
            TokenResult::Success(grant) => grant,
            TokenResult::Failed => return Err(AuthEngineError::ExchangeFailed),
        };

        let account_id =
            identity::extract_account_id(&grant.access_token, &config.account_id_claim)?;
        let refresh_token = grant.refresh_token.ok_or(AuthEngineError::ExchangeFailed)?;
        let credential = Credential {
            access_token: grant.access_token,
            refresh_token,
            expires_at: grant.expires_at,
            account_id,
            last_refresh: Some(Utc::now()),
        };

        self.inner.commit(None, credential.clone())?;
        Ok(credential)
    }
}

impl Inner {
    fn margin(&self) -> Duration {
        Duration::try_seconds(self.config.refresh_margin_secs).unwrap_or_else(Duration::zero)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load from persistence once. A load failure is recorded in the state
    /// and leaves the store empty.
    fn ensure_loaded(&self) {
        if self.read_state().loaded {
            return;
        }

        let mut state = self.write_state();
        if state.loaded {
            return;
        }
        state.loaded = true;

        match self.persistence.load() {
            Ok(Some(credential)) => {
                tracing::debug!(account_id = %credential.account_id, "loaded stored credential");
                state.credential = Some(credential);
            }
            Ok(None) => tracing::debug!("no stored credential"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load stored credential");
                state.error = Some(AuthFailure::from(e));
            }
        }
    }

    /// Persist, then publish. Callers never observe an unsaved credential.
    ///
    /// `None` commits a new login and starts a generation. `Some(generation)`
    /// commits a refresh only if that generation is still current; returns
    /// `false` without saving otherwise.
    fn commit(&self, expected: Option<u64>, credential: Credential) -> Result<bool> {
        let mut state = self.write_state();
        if expected.is_some_and(|g| g != state.generation) {
            return Ok(false);
        }
        self.persistence.save(&credential)?;
        state.loaded = true;
        state.credential = Some(credential);
        state.error = None;
        if expected.is_none() {
            state.generation += 1;
        }
        Ok(true)
    }

    fn record_failure(&self, failure: AuthFailure) {
        self.write_state().error = Some(failure);
    }

    /// Record a refresh failure unless the generation has moved on.
    fn record_refresh_failure(&self, generation: u64, failure: AuthFailure) -> bool {
        let mut state = self.write_state();
        if state.generation != generation {
            return false;
        }
        state.error = Some(failure);
        true
    }

    /// What a refresh superseded by logout or login hands its waiters.
    fn superseded(&self) -> std::result::Result<Credential, AuthFailure> {
        tracing::info!("credential changed during refresh, discarding refresh result");
        self.read_state()
            .credential
            .clone()
            .ok_or_else(|| AuthEngineError::NotAuthenticated.into())
    }

    /// Attach to the in-flight refresh, installing one if none is running.
    fn in_flight_refresh(self: &Arc<Self>) -> SharedRefresh {
        let mut slot = lock(&self.in_flight);
        if let Some(existing) = slot.as_ref() {
            tracing::debug!("joining in-flight token refresh");
            return existing.clone();
        }

        let inner = Arc::clone(self);
        let refresh = async move {
            let outcome = inner.refresh().await;
            lock(&inner.in_flight).take();
            outcome
        }
        .boxed()
        .shared();

        *slot = Some(refresh.clone());
        refresh
    }

    async fn refresh(&self) -> std::result::Result<Credential, AuthFailure> {
        let (current, generation) = {
            let state = self.read_state();
            (state.credential.clone(), state.generation)
        };
        let Some(current) = current else {
            return Err(AuthEngineError::NotAuthenticated.into());
        };

        // Another refresh may have completed between the caller's check and
        // this one being installed.
        if current.is_fresh(self.margin()) {
            return Ok(current);
        }

        tracing::info!(account_id = %current.account_id, "access token stale, refreshing");

        let outcome = match self
            .exchanger
            .exchange_refresh_token(&current.refresh_token)
            .await
        {
            Ok(TokenResult::Success(grant)) => self.adopt_refresh(generation, &current, grant),
            Ok(TokenResult::Failed) => Err(AuthEngineError::RefreshFailed {
                reason: "the token endpoint rejected the refresh token".to_string(),
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(credential)) => {
                tracing::info!(account_id = %credential.account_id, "token refreshed successfully");
                Ok(credential)
            }
            Ok(None) => self.superseded(),
            Err(e) => {
                let failure = AuthFailure::from(e);
                tracing::warn!(kind = ?failure.kind, error = %failure, "token refresh failed");
                // The stale credential stays so the last-known account
                // remains visible.
                if self.record_refresh_failure(generation, failure.clone()) {
                    Err(failure)
                } else {
                    self.superseded()
                }
            }
        }
    }

    /// `Ok(None)` when the credential generation changed mid-refresh.
    fn adopt_refresh(
        &self,
        generation: u64,
        current: &Credential,
        grant: TokenGrant,
    ) -> Result<Option<Credential>> {
        let account_id =
            identity::extract_account_id(&grant.access_token, &self.config.account_id_claim)?;
        if account_id != current.account_id {
            return Err(AuthEngineError::AccountMismatch {
                expected: current.account_id.clone(),
                actual: account_id,
            });
        }

        let refreshed = Credential {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .unwrap_or_else(|| current.refresh_token.clone()),
            expires_at: grant.expires_at,
            account_id,
            last_refresh: Some(Utc::now()),
        };

        if self.commit(Some(generation), refreshed.clone())? {
            Ok(Some(refreshed))
        } else {
            Ok(None)
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.close();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::credential::InMemoryPersistence;

    fn token_for(account: &str, nonce: &str) -> String {
        let payload = serde_json::json!({
            "nonce": nonce,
            "https://api.openai.com/auth": { "chatgpt_account_id": account }
        });
        format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    /// Exchanger that answers refreshes from a fixed script and counts calls.
    struct ScriptedExchanger {
        refresh_calls: AtomicUsize,
        refresh_result: std::sync::Mutex<Option<TokenResult>>,
        delay: StdDuration,
    }

    impl ScriptedExchanger {
        fn new(result: TokenResult) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_result: std::sync::Mutex::new(Some(result)),
                delay: StdDuration::from_millis(20),
            }
        }

        fn with_delay(mut self, delay: StdDuration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchanger for ScriptedExchanger {
        async fn exchange_code(&self, _code: &str, _verifier: &str) -> Result<TokenResult> {
            Ok(TokenResult::Failed)
        }

        async fn exchange_refresh_token(&self, _refresh_token: &str) -> Result<TokenResult> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self
                .refresh_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(TokenResult::Failed))
        }
    }

    fn grant(account: &str, nonce: &str, refresh: Option<&str>) -> TokenResult {
        TokenResult::Success(TokenGrant {
            access_token: token_for(account, nonce),
            refresh_token: refresh.map(String::from),
            expires_at: Utc::now() + Duration::minutes(15),
        })
    }

    fn stored(expires_in_secs: i64) -> Credential {
        Credential {
            access_token: token_for("acct_1", "old"),
            refresh_token: "ref_old".to_string(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            account_id: "acct_1".to_string(),
            last_refresh: None,
        }
    }

    fn store_with(
        credential: Option<Credential>,
        exchanger: Arc<ScriptedExchanger>,
    ) -> (CredentialStore, Arc<InMemoryPersistence>) {
        let persistence = Arc::new(match credential {
            Some(c) => InMemoryPersistence::with_credential(c),
            None => InMemoryPersistence::default(),
        });
        let store = CredentialStore::new(
            OAuthConfig::default(),
            exchanger,
            Arc::clone(&persistence) as Arc<dyn CredentialPersistence>,
        );
        (store, persistence)
    }

    #[test]
    fn auth_state_loads_lazily() {
        let exchanger = Arc::new(ScriptedExchanger::new(TokenResult::Failed));
        let (store, _) = store_with(Some(stored(3600)), Arc::clone(&exchanger));

        let state = store.auth_state();
        assert!(state.is_authenticated);
        assert_eq!(state.account_id(), Some("acct_1"));
        assert!(state.error.is_none());
        assert_eq!(exchanger.calls(), 0);
    }

    #[test]
    fn auth_state_without_credential() {
        let exchanger = Arc::new(ScriptedExchanger::new(TokenResult::Failed));
        let (store, _) = store_with(None, exchanger);
        let state = store.auth_state();
        assert!(!state.is_authenticated);
        assert!(state.credentials.is_none());
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let exchanger = Arc::new(ScriptedExchanger::new(grant("acct_1", "new", None)));
        let (store, _) = store_with(Some(stored(3600)), Arc::clone(&exchanger));

        let token = store.valid_access_token().await.unwrap();
        assert_eq!(token, token_for("acct_1", "old"));
        assert_eq!(exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn no_credential_is_not_authenticated() {
        let exchanger = Arc::new(ScriptedExchanger::new(grant("acct_1", "new", None)));
        let (store, _) = store_with(None, Arc::clone(&exchanger));

        let err = store.valid_access_token().await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NotAuthenticated);
        assert_eq!(exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let exchanger = Arc::new(ScriptedExchanger::new(grant("acct_1", "new", Some("ref_new"))));
        let (store, persistence) = store_with(Some(stored(-10)), Arc::clone(&exchanger));

        let (a, b) = tokio::join!(store.valid_access_token(), store.valid_access_token());

        assert_eq!(exchanger.calls(), 1);
        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a, token_for("acct_1", "new"));

        let saved = persistence.load().unwrap().unwrap();
        assert_eq!(saved.access_token, a);
        assert_eq!(saved.refresh_token, "ref_new");
        assert!(saved.last_refresh.is_some());
    }

    #[tokio::test]
    async fn spawned_callers_share_one_refresh() {
        let exchanger = Arc::new(ScriptedExchanger::new(grant("acct_1", "new", None)));
        let (store, _) = store_with(Some(stored(-10)), Arc::clone(&exchanger));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.valid_access_token().await })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(exchanger.calls(), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let exchanger = Arc::new(ScriptedExchanger::new(grant("acct_1", "new", None)));
        let (store, _) = store_with(Some(stored(10)), exchanger);

        store.valid_access_token().await.unwrap();
        let state = store.auth_state();
        assert_eq!(state.credentials.unwrap().refresh_token, "ref_old");
    }

    #[tokio::test]
    async fn refresh_failure_is_shared_and_keeps_stale_credential() {
        let exchanger = Arc::new(ScriptedExchanger::new(TokenResult::Failed));
        let (store, _) = store_with(Some(stored(-10)), Arc::clone(&exchanger));

        let (a, b) = tokio::join!(store.valid_access_token(), store.valid_access_token());
        assert_eq!(exchanger.calls(), 1);
        let a = a.unwrap_err();
        assert_eq!(a.kind, FailureKind::RefreshFailed);
        assert_eq!(a, b.unwrap_err());

        let state = store.auth_state();
        assert!(state.is_authenticated);
        assert_eq!(state.account_id(), Some("acct_1"));
        assert!(state.requires_reauthentication());
    }

    #[tokio::test]
    async fn failed_refresh_can_be_retried() {
        let exchanger = Arc::new(ScriptedExchanger::new(TokenResult::Failed));
        let (store, _) = store_with(Some(stored(-10)), Arc::clone(&exchanger));

        assert!(store.valid_access_token().await.is_err());

        *exchanger.refresh_result.lock().unwrap() = Some(grant("acct_1", "retry", None));
        let token = store.valid_access_token().await.unwrap();

        assert_eq!(exchanger.calls(), 2);
        assert_eq!(token, token_for("acct_1", "retry"));
        assert!(store.auth_state().error.is_none());
    }

    #[tokio::test]
    async fn account_change_across_refresh_is_rejected() {
        let exchanger = Arc::new(ScriptedExchanger::new(grant("acct_other", "new", None)));
        let (store, persistence) = store_with(Some(stored(-10)), exchanger);

        let err = store.valid_access_token().await.unwrap_err();
        assert_eq!(err.kind, FailureKind::AccountMismatch);
        assert!(err.message.contains("acct_other"));

        let saved = persistence.load().unwrap().unwrap();
        assert_eq!(saved.account_id, "acct_1");
        assert_eq!(saved.refresh_token, "ref_old");
        assert!(store.auth_state().requires_reauthentication());
    }

    #[tokio::test]
    async fn logout_clears_memory_and_persistence() {
        let exchanger = Arc::new(ScriptedExchanger::new(TokenResult::Failed));
        let (store, persistence) = store_with(Some(stored(3600)), exchanger);

        assert!(store.auth_state().is_authenticated);
        store.logout().await.unwrap();

        assert!(!store.auth_state().is_authenticated);
        assert!(persistence.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_refresh_discards_the_refresh() {
        let exchanger = Arc::new(
            ScriptedExchanger::new(grant("acct_1", "new", Some("ref_new")))
                .with_delay(StdDuration::from_millis(200)),
        );
        let (store, persistence) = store_with(Some(stored(-10)), Arc::clone(&exchanger));

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.valid_access_token().await })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        store.logout().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind, FailureKind::NotAuthenticated);
        assert_eq!(exchanger.calls(), 1);

        let state = store.auth_state();
        assert!(!state.is_authenticated);
        assert!(state.error.is_none());
        assert!(persistence.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_after_logout_records_nothing() {
        let exchanger = Arc::new(
            ScriptedExchanger::new(TokenResult::Failed).with_delay(StdDuration::from_millis(200)),
        );
        let (store, _) = store_with(Some(stored(-10)), exchanger);

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.valid_access_token().await })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        store.logout().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind, FailureKind::NotAuthenticated);
        assert!(store.auth_state().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn login_during_refresh_keeps_the_new_login() {
        let exchanger = Arc::new(
            ScriptedExchanger::new(grant("acct_1", "new", Some("ref_new")))
                .with_delay(StdDuration::from_millis(200)),
        );
        let (store, persistence) = store_with(Some(stored(-10)), Arc::clone(&exchanger));

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.valid_access_token().await })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let login = Credential {
            access_token: token_for("acct_2", "login"),
            refresh_token: "ref_login".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            account_id: "acct_2".to_string(),
            last_refresh: Some(Utc::now()),
        };
        assert!(store.inner.commit(None, login.clone()).unwrap());

        assert_eq!(pending.await.unwrap().unwrap(), login.access_token);
        assert_eq!(exchanger.calls(), 1);
        assert_eq!(store.auth_state().credentials, Some(login.clone()));
        assert_eq!(persistence.load().unwrap(), Some(login));
    }

    #[tokio::test]
    async fn second_login_replaces_the_first() {
        let port = {
            let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            reserved.local_addr().unwrap().port()
        };
        let config = OAuthConfig {
            callback_port: port,
            ..OAuthConfig::default()
        };
        let store = CredentialStore::new(
            config,
            Arc::new(ScriptedExchanger::new(TokenResult::Failed)),
            Arc::new(InMemoryPersistence::default()),
        );

        let (url_tx, mut url_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let (first_tx, second_tx) = (url_tx.clone(), url_tx);
        let first = store.start_oauth_flow(move |_| {
            let _ = first_tx.send(());
        });
        let second = store.start_oauth_flow(move |_| {
            let _ = second_tx.send(());
        });
        let user = async {
            tokio::time::timeout(StdDuration::from_secs(5), async {
                url_rx.recv().await.unwrap();
                url_rx.recv().await.unwrap();
            })
            .await
            .expect("both logins published a URL");
            store.close_session().await;
        };

        let (first, second, ()) = tokio::join!(first, second, user);
        assert!(first.is_none());
        assert!(second.is_none());
        assert_eq!(store.auth_state().error.unwrap().kind, FailureKind::Cancelled);
        assert!(ListenerSession::start(port, "/auth/callback", StdDuration::from_secs(1))
            .await
            .is_ok());
    }

    #[test]
    fn credential_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CredentialStore>();
    }
}
