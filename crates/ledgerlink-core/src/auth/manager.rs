//! Session lifecycle: login, handshake completion, transparent refresh, logout.
//!
//! The token pair is the only shared mutable state in the core. It changes on
//! exactly three events: a session being established (login or handshake), a
//! successful refresh, and a clear (logout, expiry, new handshake). Each clear or
//! establish bumps the session epoch; a refresh only commits if the epoch it
//! started under is still current, so it can never resurrect a cleared session.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::session::{SessionData, SessionEvent, SessionState, TokenPair};
use super::store::SessionStore;
use crate::api::ApiClient;
use crate::error::{AuthError, NetworkError, Result};
use crate::mode::Mode;
use crate::models::User;

/// Buffer size for the session event channel.
const EVENT_CHANNEL_SIZE: usize = 32;

struct Inner {
    state: SessionState,
    session: Option<SessionData>,
    epoch: u64,
    last_error: Option<String>,
}

/// Access token captured at request construction, tagged with its session epoch.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    epoch: u64,
}

pub struct SessionManager {
    mode: Mode,
    api: ApiClient,
    store: Arc<dyn SessionStore>,
    inner: RwLock<Inner>,
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(mode: Mode, api: ApiClient, store: Arc<dyn SessionStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            mode,
            api,
            store,
            inner: RwLock::new(Inner {
                state: SessionState::Uninitialized,
                session: None,
                epoch: 0,
                last_error: None,
            }),
            refresh_gate: Mutex::new(()),
            events,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(from = %from, to = %to, "Session state changed");
        let _ = self.events.send(SessionEvent::StateChanged { from, to });
    }

    /// Drop the in-memory session and every persisted key, starting a new epoch.
    fn clear_locked(&self, inner: &mut Inner, to: SessionState) {
        SessionData::purge(self.store.as_ref());
        inner.session = None;
        inner.epoch += 1;
        self.set_state(inner, to);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        let inner = self.inner.read().await;
        inner.session.is_some() && inner.state.is_authenticated()
    }

    pub async fn user(&self) -> Option<User> {
        self.inner.read().await.session.as_ref().map(|s| s.user.clone())
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }

    /// Current access token. Read it when building a request; don't hold it
    /// across an await.
    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .session
            .as_ref()
            .map(|s| s.tokens.access_token.clone())
    }

    /// Current session epoch. Changes whenever a session is established or cleared.
    pub async fn epoch(&self) -> u64 {
        self.inner.read().await.epoch
    }

    pub async fn credential(&self) -> Result<Credential> {
        let inner = self.inner.read().await;
        match inner.session {
            Some(ref session) => Ok(Credential {
                access_token: session.tokens.access_token.clone(),
                epoch: inner.epoch,
            }),
            None => Err(AuthError::NotAuthenticated.into()),
        }
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Pick the startup path for the mode: restore in standalone, fresh
    /// handshake in embedded.
    pub async fn initialize(&self) -> SessionState {
        match self.mode {
            Mode::Standalone => {
                self.restore().await;
            }
            Mode::Embedded => self.begin_handshake().await,
        }
        self.state().await
    }

    /// Restore a persisted session. Only standalone sessions are restored; an
    /// embedded instance always re-derives trust from its current parent.
    pub async fn restore(&self) -> bool {
        if self.mode == Mode::Embedded {
            debug!("Skipping session restore in embedded mode");
            return false;
        }

        let mut inner = self.inner.write().await;
        match SessionData::load(self.store.as_ref()) {
            Some(data) => {
                info!(user_id = %data.user.id, "Restored persisted session");
                inner.session = Some(data);
                inner.epoch += 1;
                self.set_state(&mut inner, SessionState::Authenticated);
                true
            }
            None => {
                self.set_state(&mut inner, SessionState::Unauthenticated);
                false
            }
        }
    }

    // =========================================================================
    // Establishing a session
    // =========================================================================

    fn establish_locked(&self, inner: &mut Inner, data: SessionData) {
        SessionData::purge(self.store.as_ref());
        if let Err(e) = data.save(self.store.as_ref()) {
            warn!(error = %e, "Failed to persist session");
        }
        info!(user_id = %data.user.id, mode = %self.mode, "Session established");
        inner.session = Some(data);
        inner.epoch += 1;
        inner.last_error = None;
        self.set_state(inner, SessionState::Authenticated);
    }

    /// Standalone credential login. Failure leaves the session unauthenticated
    /// with the error recorded; nothing is retried.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        if self.mode == Mode::Embedded {
            return Err(AuthError::PasswordLoginUnavailable.into());
        }

        let epoch = {
            let mut inner = self.inner.write().await;
            if inner.state.is_authenticated() {
                info!("Replacing existing session with a new login");
                self.clear_locked(&mut inner, SessionState::Unauthenticated);
            } else if !inner.state.can_login() {
                debug!(state = %inner.state, "Login refused in current state");
                return Err(AuthError::LoginInProgress.into());
            }
            self.set_state(&mut inner, SessionState::Authenticating);
            inner.epoch
        };

        let result = self.api.login(email, password).await;

        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            warn!("Session changed while login was in flight; discarding login result");
            return Err(AuthError::NotAuthenticated.into());
        }
        match result {
            Ok(grant) => {
                let user = grant.user.clone();
                self.establish_locked(
                    &mut inner,
                    SessionData {
                        tokens: TokenPair {
                            access_token: grant.access_token,
                            refresh_token: grant.refresh_token,
                        },
                        user: grant.user,
                    },
                );
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                inner.last_error = Some(e.to_string());
                self.set_state(&mut inner, SessionState::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Enter `AwaitingHandshake`, discarding any residual session first.
    pub async fn begin_handshake(&self) {
        let mut inner = self.inner.write().await;
        inner.last_error = None;
        self.clear_locked(&mut inner, SessionState::AwaitingHandshake);
    }

    /// Accept credentials delivered by the parent frame.
    pub async fn complete_handshake(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        user: User,
    ) -> Result<User> {
        if access_token.trim().is_empty() || !user.is_well_formed() {
            return Err(NetworkError::MalformedResponse(
                "handshake response is missing a token or user".to_string(),
            )
            .into());
        }

        let mut inner = self.inner.write().await;
        if inner.state.is_authenticated() {
            info!("Parent frame rotated the session credentials");
        }
        self.establish_locked(
            &mut inner,
            SessionData {
                tokens: TokenPair {
                    access_token,
                    refresh_token,
                },
                user: user.clone(),
            },
        );
        Ok(user)
    }

    /// Move from `AwaitingHandshake` to `HandshakeFailed`. Returns false if the
    /// handshake was no longer pending, so the failure is recorded at most once.
    pub async fn fail_handshake(&self, reason: &AuthError) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::AwaitingHandshake {
            return false;
        }
        warn!(reason = %reason, "Handshake failed");
        inner.last_error = Some(reason.to_string());
        self.set_state(&mut inner, SessionState::HandshakeFailed);
        true
    }

    // =========================================================================
    // Clearing
    // =========================================================================

    pub async fn logout(&self) {
        let mut inner = self.inner.write().await;
        info!("Logging out");
        inner.last_error = None;
        self.clear_locked(&mut inner, SessionState::Unauthenticated);
    }

    /// Purge persisted keys without touching the in-memory state. Used when the
    /// parent asks for storage to be cleared before a session exists.
    pub fn purge_persisted(&self) {
        SessionData::purge(self.store.as_ref());
    }

    /// Force-expire the session, but only if it is still the one from `epoch`.
    async fn expire(&self, epoch: u64) {
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            return;
        }
        inner.last_error = Some(AuthError::SessionExpired.to_string());
        self.clear_locked(&mut inner, SessionState::SessionExpired);
    }

    // =========================================================================
    // Authenticated requests
    // =========================================================================

    /// Run `call` with the current access token. A 401 triggers one refresh and
    /// one retry with the new token; a second failure is returned as-is.
    pub async fn authorized<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credential = self.credential().await?;
        match call(credential.access_token.clone()).await {
            Err(e) if e.is_unauthorized() => {
                debug!("Request unauthorized, refreshing token");
                let token = self.refresh_after_unauthorized(&credential).await?;
                call(token).await
            }
            other => other,
        }
    }

    /// Single-flight refresh. Callers that hit a 401 with the same stale token
    /// queue on the gate; the first one refreshes, the rest pick up its token.
    async fn refresh_after_unauthorized(&self, stale: &Credential) -> Result<String> {
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = {
            let mut inner = self.inner.write().await;
            if inner.epoch != stale.epoch {
                return Err(AuthError::SessionExpired.into());
            }
            let (current, refresh) = match inner.session {
                Some(ref session) => (
                    session.tokens.access_token.clone(),
                    session.tokens.refresh_token.clone(),
                ),
                None => return Err(AuthError::SessionExpired.into()),
            };
            if current != stale.access_token {
                debug!("Token already refreshed by a concurrent request");
                return Ok(current);
            }
            if refresh.is_some() {
                self.set_state(&mut inner, SessionState::Refreshing);
            }
            refresh
        };

        let Some(refresh_token) = refresh_token else {
            warn!("Access token rejected and no refresh token is held, expiring session");
            self.expire(stale.epoch).await;
            return Err(AuthError::SessionExpired.into());
        };

        match self.api.refresh(&refresh_token).await {
            Ok(grant) => {
                let mut inner = self.inner.write().await;
                if inner.epoch != stale.epoch {
                    warn!("Session was cleared during refresh; discarding new token");
                    return Err(AuthError::SessionExpired.into());
                }
                let access_token = grant.access_token;
                if let Some(session) = inner.session.as_mut() {
                    session.tokens.access_token = access_token.clone();
                    if let Some(rotated) = grant.refresh_token {
                        session.tokens.refresh_token = Some(rotated);
                    }
                    if let Err(e) = session.save(self.store.as_ref()) {
                        warn!(error = %e, "Failed to persist refreshed token");
                    }
                }
                info!("Access token refreshed");
                self.set_state(&mut inner, SessionState::Authenticated);
                Ok(access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, forcing logout");
                self.expire(stale.epoch).await;
                Err(AuthError::SessionExpired.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};
    use crate::auth::store::MemoryStore;
    use crate::error::Error;
    use crate::test_support::{login_body, test_user, MockTransport};
    use serde_json::json;

    fn manager(mode: Mode, mock: &Arc<MockTransport>, store: &Arc<MemoryStore>) -> SessionManager {
        let api = ApiClient::new(mock.clone(), "http://auth.test", "http://api.test");
        SessionManager::new(mode, api, store.clone())
    }

    async fn logged_in(mock: &Arc<MockTransport>, store: &Arc<MemoryStore>) -> SessionManager {
        mock.push("POST", "/login", 200, login_body("acc-1", "ref-1"));
        let session = manager(Mode::Standalone, mock, store);
        session.initialize().await;
        session.login("ada@example.com", "pw").await.unwrap();
        session
    }

    async fn fetch_balance(session: &SessionManager, api: &ApiClient) -> Result<i64> {
        session
            .authorized(|token| {
                let api = api.clone();
                async move { api.balance(&token).await }
            })
            .await
    }

    fn api(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::new(mock.clone(), "http://auth.test", "http://api.test")
    }

    #[tokio::test]
    async fn test_login_persists_and_authenticates() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = logged_in(&mock, &store).await;

        assert_eq!(session.state().await, SessionState::Authenticated);
        assert_eq!(session.access_token().await.as_deref(), Some("acc-1"));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("acc-1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("ref-1"));
        assert!(store.get(USER_KEY).is_some());
    }

    #[tokio::test]
    async fn test_failed_login_stays_unauthenticated() {
        let mock = MockTransport::new();
        mock.push("POST", "/login", 401, json!({"message": "Bad password"}));
        let store = Arc::new(MemoryStore::new());
        let session = manager(Mode::Standalone, &mock, &store);
        session.initialize().await;

        let err = session.login("ada@example.com", "nope").await.unwrap_err();
        assert_eq!(err.code(), "InvalidCredentials");
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        assert!(session.last_error().await.unwrap().contains("Bad password"));
        assert!(store.is_empty());
        // No automatic retry
        assert_eq!(mock.count("POST", "/login"), 1);
    }

    #[tokio::test]
    async fn test_overlapping_login_is_refused() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(manager(Mode::Standalone, &mock, &store));
        session.initialize().await;

        mock.push("POST", "/login", 200, login_body("acc-1", "ref-1"));
        let release = mock.hold("POST", "/login");
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.login("ada@example.com", "pw").await })
        };
        mock.wait_for("POST", "/login").await;
        assert_eq!(session.state().await, SessionState::Authenticating);

        let err = session.login("ada@example.com", "pw").await.unwrap_err();
        assert_eq!(err, Error::Auth(AuthError::LoginInProgress));
        assert_eq!(mock.count("POST", "/login"), 1);

        release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(session.state().await, SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_password_login_refused_when_embedded() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = manager(Mode::Embedded, &mock, &store);

        let err = session.login("ada@example.com", "pw").await.unwrap_err();
        assert_eq!(err, Error::Auth(AuthError::PasswordLoginUnavailable));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_restore_only_in_standalone() {
        let store = Arc::new(MemoryStore::new());
        SessionData {
            tokens: TokenPair {
                access_token: "saved".to_string(),
                refresh_token: None,
            },
            user: test_user(),
        }
        .save(store.as_ref())
        .unwrap();

        let mock = MockTransport::new();
        let standalone = manager(Mode::Standalone, &mock, &store);
        assert_eq!(standalone.initialize().await, SessionState::Authenticated);
        assert_eq!(standalone.access_token().await.as_deref(), Some("saved"));

        // Embedded ignores and clears whatever was persisted
        let embedded = manager(Mode::Embedded, &mock, &store);
        assert_eq!(embedded.initialize().await, SessionState::AwaitingHandshake);
        assert_eq!(embedded.access_token().await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_request_fails_without_network() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = manager(Mode::Standalone, &mock, &store);
        session.initialize().await;

        let err = fetch_balance(&session, &api(&mock)).await.unwrap_err();
        assert_eq!(err, Error::Auth(AuthError::NotAuthenticated));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = logged_in(&mock, &store).await;

        mock.push("GET", "/balance", 401, json!({"message": "jwt expired"}));
        mock.push("POST", "/refresh", 200, json!({"success": true, "data": {"access_token": "acc-2"}}));
        mock.push("GET", "/balance", 200, json!({"success": true, "data": {"balance": 77}}));

        let balance = fetch_balance(&session, &api(&mock)).await.unwrap();
        assert_eq!(balance, 77);
        assert_eq!(session.state().await, SessionState::Authenticated);
        assert_eq!(session.access_token().await.as_deref(), Some("acc-2"));
        // Refresh token is not rotated unless the backend says so
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("ref-1"));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("acc-2"));

        let tokens: Vec<Option<String>> = mock
            .requests_to("GET", "/balance")
            .into_iter()
            .map(|r| r.bearer)
            .collect();
        assert_eq!(tokens, vec![Some("acc-1".to_string()), Some("acc-2".to_string())]);
        assert_eq!(mock.requests_to("POST", "/refresh")[0].body.as_ref().unwrap()["refresh_token"], "ref-1");
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = logged_in(&mock, &store).await;

        mock.push("GET", "/balance", 401, json!({}));
        mock.push(
            "POST",
            "/refresh",
            200,
            json!({"success": true, "data": {"access_token": "acc-2", "refresh_token": "ref-2"}}),
        );
        mock.push("GET", "/balance", 200, json!({"success": true, "data": {"balance": 1}}));

        fetch_balance(&session, &api(&mock)).await.unwrap();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("ref-2"));
    }

    #[tokio::test]
    async fn test_refresh_failure_forces_logout() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = logged_in(&mock, &store).await;
        let mut events = session.subscribe();

        mock.push("GET", "/balance", 401, json!({}));
        mock.push("POST", "/refresh", 401, json!({"message": "refresh token revoked"}));

        let err = fetch_balance(&session, &api(&mock)).await.unwrap_err();
        assert_eq!(err, Error::Auth(AuthError::SessionExpired));
        assert_eq!(session.state().await, SessionState::SessionExpired);
        assert!(!session.is_authenticated().await);
        assert!(store.is_empty());
        // Exactly one refresh, and the original call was not retried
        assert_eq!(mock.count("POST", "/refresh"), 1);
        assert_eq!(mock.count("GET", "/balance"), 1);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                from: SessionState::Authenticated,
                to: SessionState::Refreshing
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                from: SessionState::Refreshing,
                to: SessionState::SessionExpired
            }
        );
    }

    #[tokio::test]
    async fn test_second_401_after_refresh_is_surfaced() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = logged_in(&mock, &store).await;

        mock.push("GET", "/balance", 401, json!({}));
        mock.push("POST", "/refresh", 200, json!({"success": true, "data": {"access_token": "acc-2"}}));
        mock.push("GET", "/balance", 401, json!({}));

        let err = fetch_balance(&session, &api(&mock)).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(mock.count("POST", "/refresh"), 1);
        assert_eq!(mock.count("GET", "/balance"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = logged_in(&mock, &store).await;

        mock.push("GET", "/balance", 401, json!({}));
        mock.push("GET", "/balance", 401, json!({}));
        mock.push("POST", "/refresh", 200, json!({"success": true, "data": {"access_token": "acc-2"}}));
        mock.push("GET", "/balance", 200, json!({"success": true, "data": {"balance": 5}}));
        mock.push("GET", "/balance", 200, json!({"success": true, "data": {"balance": 5}}));

        let api = api(&mock);
        let (a, b) = tokio::join!(fetch_balance(&session, &api), fetch_balance(&session, &api));
        assert_eq!(a.unwrap(), 5);
        assert_eq!(b.unwrap(), 5);

        assert_eq!(mock.count("POST", "/refresh"), 1);
        let tokens: Vec<String> = mock
            .requests_to("GET", "/balance")
            .into_iter()
            .filter_map(|r| r.bearer)
            .collect();
        assert_eq!(tokens, vec!["acc-1", "acc-1", "acc-2", "acc-2"]);
    }

    #[tokio::test]
    async fn test_logout_during_refresh_is_not_resurrected() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(logged_in(&mock, &store).await);

        mock.push("GET", "/balance", 401, json!({}));
        mock.push("POST", "/refresh", 200, json!({"success": true, "data": {"access_token": "acc-2"}}));
        // Hold the refresh response until logout has happened
        let release = mock.hold("POST", "/refresh");

        let task = {
            let session = session.clone();
            let api = api(&mock);
            tokio::spawn(async move { fetch_balance(&session, &api).await })
        };

        mock.wait_for("POST", "/refresh").await;
        session.logout().await;
        release.notify_one();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, Error::Auth(AuthError::SessionExpired));
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        assert_eq!(session.access_token().await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_expires() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = manager(Mode::Embedded, &mock, &store);
        session.initialize().await;
        session
            .complete_handshake("acc-only".to_string(), None, test_user())
            .await
            .unwrap();

        mock.push("GET", "/balance", 401, json!({}));
        let err = fetch_balance(&session, &api(&mock)).await.unwrap_err();
        assert_eq!(err, Error::Auth(AuthError::SessionExpired));
        assert_eq!(session.state().await, SessionState::SessionExpired);
        assert_eq!(mock.count("POST", "/refresh"), 0);
    }

    #[tokio::test]
    async fn test_fail_handshake_only_once() {
        let mock = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let session = manager(Mode::Embedded, &mock, &store);
        session.initialize().await;

        let reason = AuthError::HandshakeTimeout { waited_ms: 10 };
        assert!(session.fail_handshake(&reason).await);
        assert!(!session.fail_handshake(&reason).await);
        assert_eq!(session.state().await, SessionState::HandshakeFailed);
    }
}
