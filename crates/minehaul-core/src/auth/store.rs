//! The session store: one owned object holding the planner's authentication
//! state, shared by reference with every consumer.
//!
//! State changes are published on a `watch` channel. Operations that change
//! state run one at a time behind an async lock; reads never wait on it.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AuthBackend};
use crate::models::{AccountKind, Identity, LoginCredentials, Registration, Role};

use super::error::AuthError;
use super::state::{AuthPhase, AuthState, AuthStatus};
use super::storage::TokenStore;
use super::token::AccessToken;

pub struct SessionStore {
    backend: Arc<dyn AuthBackend>,
    persistence: Arc<dyn TokenStore>,
    state: watch::Sender<AuthState>,
    op_lock: Mutex<()>,
}

/// Resets the store to signed-out when dropped, so logout clears local
/// credentials even if the backend call errors or the future is dropped.
struct SignOutOnDrop<'a> {
    store: &'a SessionStore,
}

impl Drop for SignOutOnDrop<'_> {
    fn drop(&mut self) {
        self.store.sign_out();
    }
}

impl SessionStore {
    /// Create a store in the `Uninitialized` phase. Call `initialize` once at startup.
    pub fn new(backend: Arc<dyn AuthBackend>, persistence: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            backend,
            persistence,
            state,
            op_lock: Mutex::new(()),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Current snapshot of the state.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receive every published state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> AuthStatus {
        self.state.borrow().status()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// Bearer token for authorized API calls, if signed in.
    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.as_ref().map(|t| t.as_str().to_string())
    }

    /// Wait until initialization has settled and return the resting state.
    pub async fn wait_ready(&self) -> AuthState {
        let mut rx = self.subscribe();
        let ready = match rx.wait_for(|s| !s.is_initializing()).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so the channel cannot close while we borrow it.
            Err(_) => self.state(),
        };
        ready
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Establish whether a persisted token still signs the planner in.
    ///
    /// Runs once per store; later calls return immediately. The phase stays
    /// `Checking` until every awaited call in the chosen branch has resolved.
    pub async fn initialize(&self) {
        let _op = self.op_lock.lock().await;

        if self.state.borrow().phase != AuthPhase::Uninitialized {
            debug!("Session store already initialized");
            return;
        }
        self.state.send_modify(|s| s.phase = AuthPhase::Checking);

        let stored = match self.persistence.get() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted token, discarding it");
                None
            }
        };

        let Some(raw) = stored else {
            info!("No persisted token, starting signed out");
            self.sign_out();
            return;
        };

        match AccessToken::parse(&raw) {
            Err(e) => {
                warn!(error = %e, "Persisted token is malformed, discarding it");
                self.sign_out();
            }
            Ok(token) if !token.is_expired() => {
                debug!(expires_at = %token.expires_at(), "Persisted token still valid");
                self.state.send_modify(|s| s.token = Some(token.clone()));
                let _ = self.establish_identity(token).await;
            }
            Ok(expired) => {
                info!(expired_at = %expired.expires_at(), "Persisted token expired, attempting silent refresh");
                self.silent_refresh(expired).await;
            }
        }

        info!(authenticated = self.is_authenticated(), "Session store initialized");
    }

    /// Trade an expired token for a fresh one, then fetch the identity with it.
    async fn silent_refresh(&self, expired: AccessToken) {
        let raw = match self.backend.refresh(expired.as_str()).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Silent refresh failed");
                self.sign_out();
                return;
            }
        };

        let fresh = match AccessToken::parse(&raw) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "Refresh returned a malformed token");
                self.sign_out();
                return;
            }
        };

        self.persist(&fresh);
        self.state.send_modify(|s| s.token = Some(fresh.clone()));
        let _ = self.establish_identity(fresh).await;
    }

    /// Fetch the identity for `token`. On success the store is signed in and
    /// the session list is synced; on failure everything is cleared.
    async fn establish_identity(&self, token: AccessToken) -> Result<Identity, ApiError> {
        match self.backend.current_identity(token.as_str()).await {
            Ok(identity) => {
                info!(user_id = %identity.id, role = %identity.role, "Identity fetched");
                self.state.send_modify(|s| {
                    s.identity = Some(identity.clone());
                    s.token = Some(token.clone());
                    s.phase = AuthPhase::Authenticated;
                });
                self.sync_sessions_quietly().await;
                Ok(identity)
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch identity, signing out");
                self.sign_out();
                Err(e)
            }
        }
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    /// Sign in. Either both the token and the identity are adopted, or nothing changes.
    pub async fn login(&self, identifier: &str, secret: &str, role: Role) -> Result<Identity, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if secret.is_empty() {
            return Err(AuthError::MissingField("password"));
        }

        let _op = self.op_lock.lock().await;

        let credentials = LoginCredentials {
            email: identifier.to_string(),
            password: secret.to_string(),
            role,
        };

        let response = match self.backend.login(&credentials).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, role = %role, "Login failed");
                return Err(e.into());
            }
        };

        let token = match AccessToken::parse(&response.token) {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Login returned a malformed token");
                return Err(e.into());
            }
        };

        self.persist(&token);
        let identity = response.identity;
        self.state.send_modify(|s| {
            s.identity = Some(identity.clone());
            s.token = Some(token);
            s.sessions.clear();
            s.phase = AuthPhase::Authenticated;
        });
        info!(user_id = %identity.id, role = %identity.role, "Login successful");

        self.sync_sessions_quietly().await;
        Ok(identity)
    }

    /// Sign out. The backend call is best effort; local state and the
    /// persisted token are always cleared.
    pub async fn logout(&self) {
        let _op = self.op_lock.lock().await;
        let _sign_out = SignOutOnDrop { store: self };

        if let Some(token) = self.token() {
            match self.backend.logout(&token).await {
                Ok(()) => debug!("Backend logout succeeded"),
                Err(e) => warn!(error = %e, "Backend logout failed, clearing local session anyway"),
            }
        }
        info!("Logged out");
    }

    /// Re-fetch the identity with the current token.
    /// A rejected token signs the planner out.
    pub async fn refresh_user(&self) -> Result<Identity, AuthError> {
        let _op = self.op_lock.lock().await;
        let token = self
            .state
            .borrow()
            .token
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;
        Ok(self.establish_identity(token).await?)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Replace the cached session list with the server's current one.
    pub async fn load_sessions(&self) -> Result<(), AuthError> {
        let _op = self.op_lock.lock().await;
        self.sync_sessions().await
    }

    /// Revoke one session, then reload the list. A failed revoke leaves the
    /// cached list untouched.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), AuthError> {
        if session_id.trim().is_empty() {
            return Err(AuthError::MissingField("session id"));
        }

        let _op = self.op_lock.lock().await;
        let token = self.token().ok_or(AuthError::NotAuthenticated)?;

        if let Err(e) = self.backend.revoke_session(&token, session_id).await {
            error!(error = %e, session_id, "Failed to revoke session");
            return Err(e.into());
        }
        info!(session_id, "Session revoked");

        self.sync_sessions().await
    }

    async fn sync_sessions(&self) -> Result<(), AuthError> {
        let token = self.token().ok_or(AuthError::NotAuthenticated)?;
        match self.backend.sessions(&token).await {
            Ok(sessions) => {
                debug!(count = sessions.len(), "Sessions loaded");
                self.state.send_modify(|s| s.sessions = sessions);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to load sessions");
                Err(e.into())
            }
        }
    }

    /// Session sync after sign-in. Failure keeps the list empty until the next explicit load.
    async fn sync_sessions_quietly(&self) {
        let _ = self.sync_sessions().await;
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Create a new account. Does not sign in; the caller logs in afterwards.
    pub async fn register(&self, kind: AccountKind, registration: &Registration) -> Result<(), AuthError> {
        if registration.display_name.trim().is_empty() {
            return Err(AuthError::MissingField("name"));
        }
        if registration.email.trim().is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if registration.password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }

        match self.backend.register(kind, registration).await {
            Ok(()) => {
                info!(kind = kind.as_str(), email = %registration.email, "Registration successful");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, kind = kind.as_str(), "Registration failed");
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn persist(&self, token: &AccessToken) {
        if let Err(e) = self.persistence.set(token.as_str()) {
            warn!(error = %e, "Failed to persist token");
        }
    }

    /// Clear the persisted token and publish the resting signed-out state.
    fn sign_out(&self) {
        if let Err(e) = self.persistence.clear() {
            warn!(error = %e, "Failed to clear persisted token");
        }
        self.state.send_replace(AuthState::signed_out());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tokio::sync::Notify;

    use crate::api::LoginResponse;
    use crate::auth::storage::MemoryTokenStore;
    use crate::auth::guard::{check_access, Access};
    use crate::auth::token::tests::{make_token, token_expiring_in};
    use crate::models::SessionRecord;

    // -------------------------------------------------------------------------
    // Fake backend
    // -------------------------------------------------------------------------

    /// In-memory backend. `None` in a slot makes that endpoint fail.
    #[derive(Default)]
    struct FakeBackend {
        login_token: StdMutex<Option<String>>,
        login_identity: StdMutex<Option<Identity>>,
        refresh_token: StdMutex<Option<String>>,
        identity: StdMutex<Option<Identity>>,
        sessions: StdMutex<Option<Vec<SessionRecord>>>,
        logout_fails: AtomicBool,
        revoke_fails: AtomicBool,
        /// When set, `refresh` waits for a notification before answering.
        refresh_gate: StdMutex<Option<Arc<Notify>>>,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeBackend {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn set_sessions(&self, sessions: Option<Vec<SessionRecord>>) {
            *self.sessions.lock().unwrap() = sessions;
        }
    }

    fn unauthorized() -> ApiError {
        ApiError::Unauthorized("invalid token".to_string())
    }

    #[async_trait]
    impl AuthBackend for FakeBackend {
        async fn login(&self, _credentials: &LoginCredentials) -> Result<LoginResponse, ApiError> {
            self.record("login");
            let token = self.login_token.lock().unwrap().clone();
            let identity = self.login_identity.lock().unwrap().clone();
            match (token, identity) {
                (Some(token), Some(identity)) => Ok(LoginResponse { token, identity }),
                _ => Err(ApiError::Unauthorized("Invalid credentials".to_string())),
            }
        }

        async fn logout(&self, _token: &str) -> Result<(), ApiError> {
            self.record("logout");
            if self.logout_fails.load(Ordering::SeqCst) {
                Err(ApiError::ServerError("connection reset".to_string()))
            } else {
                Ok(())
            }
        }

        async fn refresh(&self, _token: &str) -> Result<String, ApiError> {
            self.record("refresh");
            let gate = self.refresh_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.refresh_token.lock().unwrap().clone().ok_or_else(unauthorized)
        }

        async fn current_identity(&self, _token: &str) -> Result<Identity, ApiError> {
            self.record("me");
            self.identity.lock().unwrap().clone().ok_or_else(unauthorized)
        }

        async fn sessions(&self, _token: &str) -> Result<Vec<SessionRecord>, ApiError> {
            self.record("sessions");
            self.sessions.lock().unwrap().clone().ok_or_else(unauthorized)
        }

        async fn revoke_session(&self, _token: &str, session_id: &str) -> Result<(), ApiError> {
            self.record("revoke");
            if self.revoke_fails.load(Ordering::SeqCst) {
                return Err(ApiError::NotFound(format!("session {}", session_id)));
            }
            if let Some(list) = self.sessions.lock().unwrap().as_mut() {
                list.retain(|s| s.id != session_id);
            }
            Ok(())
        }

        async fn register(&self, kind: AccountKind, _registration: &Registration) -> Result<(), ApiError> {
            self.record(&format!("register:{}", kind.as_str()));
            Ok(())
        }
    }

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: id.to_string(),
            display_name: "Test Planner".to_string(),
            email: "a@b.com".to_string(),
            role,
            kind: Some(role.account_kind()),
            phone: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn session(id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: id.to_string(),
            origin_ip: "10.0.0.1".to_string(),
            user_agent: "Mozilla/5.0 Chrome/126.0".to_string(),
            created_at: now - Duration::hours(1),
            expires_at: now + Duration::days(7),
            last_used_at: None,
            revoked: false,
            replaced_by_token_id: None,
        }
    }

    fn store_with(backend: &Arc<FakeBackend>, persistence: &Arc<MemoryTokenStore>) -> SessionStore {
        SessionStore::new(backend.clone(), persistence.clone())
    }

    fn persisted(persistence: &MemoryTokenStore) -> Option<String> {
        persistence.get().unwrap()
    }

    fn assert_signed_out(store: &SessionStore, persistence: &MemoryTokenStore) {
        let state = store.state();
        assert_eq!(state.phase, AuthPhase::Unauthenticated);
        assert!(state.identity.is_none());
        assert!(state.token.is_none());
        assert!(state.sessions.is_empty());
        assert!(!state.is_authenticated());
        assert!(!state.is_initializing());
        assert_eq!(persisted(persistence), None);
    }

    /// Authenticated store holding `token`, with the fake's identity and sessions.
    async fn signed_in_store(
        backend: &Arc<FakeBackend>,
        persistence: &Arc<MemoryTokenStore>,
    ) -> (SessionStore, String) {
        let token = token_expiring_in(Duration::hours(1), "u1");
        persistence.set(&token).unwrap();
        *backend.identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        let store = store_with(backend, persistence);
        store.initialize().await;
        assert!(store.is_authenticated());
        (store, token)
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_init_without_persisted_token() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);

        assert!(store.state().is_initializing());
        assert_eq!(store.status(), AuthStatus::Unknown);

        store.initialize().await;

        assert_signed_out(&store, &persistence);
        assert_eq!(store.status(), AuthStatus::Unauthenticated);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_with_malformed_token_clears_without_network() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::with_token("garbage"));
        let store = store_with(&backend, &persistence);

        store.initialize().await;

        assert_signed_out(&store, &persistence);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_with_valid_token_authenticates_and_loads_sessions() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![session("s1"), session("s2")]));
        let persistence = Arc::new(MemoryTokenStore::new());

        let (store, token) = signed_in_store(&backend, &persistence).await;

        let state = store.state();
        assert_eq!(state.phase, AuthPhase::Authenticated);
        assert_eq!(state.identity.as_ref().map(|i| i.id.as_str()), Some("u1"));
        assert_eq!(store.token().as_deref(), Some(token.as_str()));
        assert_eq!(state.sessions.len(), 2);
        assert_eq!(backend.calls(), vec!["me", "sessions"]);
    }

    #[tokio::test]
    async fn test_init_session_fetch_failure_keeps_authentication() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(None);
        let persistence = Arc::new(MemoryTokenStore::new());

        let (store, token) = signed_in_store(&backend, &persistence).await;

        assert!(store.is_authenticated());
        assert!(store.state().sessions.is_empty());
        assert_eq!(persisted(&persistence), Some(token));
    }

    #[tokio::test]
    async fn test_init_identity_rejected_clears_everything() {
        let backend = Arc::new(FakeBackend::default());
        let token = token_expiring_in(Duration::hours(1), "u1");
        let persistence = Arc::new(MemoryTokenStore::with_token(token));
        let store = store_with(&backend, &persistence);

        store.initialize().await;

        assert_signed_out(&store, &persistence);
        assert_eq!(backend.calls(), vec!["me"]);
    }

    #[tokio::test]
    async fn test_init_expired_token_refresh_fails() {
        let backend = Arc::new(FakeBackend::default());
        let expired = token_expiring_in(-Duration::minutes(10), "u1");
        let persistence = Arc::new(MemoryTokenStore::with_token(expired));
        let store = store_with(&backend, &persistence);

        store.initialize().await;

        assert_signed_out(&store, &persistence);
        assert_eq!(backend.calls(), vec!["refresh"]);
    }

    #[tokio::test]
    async fn test_init_expired_token_refresh_succeeds() {
        let backend = Arc::new(FakeBackend::default());
        let expired = token_expiring_in(-Duration::minutes(10), "u1");
        let fresh = token_expiring_in(Duration::hours(1), "u1");
        *backend.refresh_token.lock().unwrap() = Some(fresh.clone());
        *backend.identity.lock().unwrap() = Some(identity("u1", Role::ShippingPlanner));
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::with_token(expired.clone()));
        let store = store_with(&backend, &persistence);

        store.initialize().await;

        assert_eq!(store.status(), AuthStatus::Authenticated);
        assert_eq!(store.token().as_deref(), Some(fresh.as_str()));
        assert_eq!(persisted(&persistence), Some(fresh));
        assert_ne!(persisted(&persistence), Some(expired));
        assert_eq!(backend.calls(), vec!["refresh", "me", "sessions"]);
    }

    #[tokio::test]
    async fn test_init_token_without_expiry_attempts_refresh() {
        let backend = Arc::new(FakeBackend::default());
        let fresh = token_expiring_in(Duration::hours(1), "u1");
        *backend.refresh_token.lock().unwrap() = Some(fresh.clone());
        *backend.identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::with_token(make_token(json!({ "id": "u1" }))));
        let store = store_with(&backend, &persistence);

        store.initialize().await;

        assert_eq!(store.status(), AuthStatus::Authenticated);
        assert_eq!(persisted(&persistence), Some(fresh));
        assert_eq!(backend.calls(), vec!["refresh", "me", "sessions"]);
    }

    #[tokio::test]
    async fn test_init_stays_checking_until_refresh_answers() {
        let backend = Arc::new(FakeBackend::default());
        let gate = Arc::new(Notify::new());
        *backend.refresh_gate.lock().unwrap() = Some(gate.clone());
        *backend.refresh_token.lock().unwrap() = Some(token_expiring_in(Duration::hours(1), "u1"));
        *backend.identity.lock().unwrap() = Some(identity("u1", Role::ShippingPlanner));
        backend.set_sessions(Some(vec![]));
        let expired = token_expiring_in(-Duration::minutes(10), "u1");
        let persistence = Arc::new(MemoryTokenStore::with_token(expired.clone()));
        let store = Arc::new(store_with(&backend, &persistence));

        let init = {
            let store = store.clone();
            tokio::spawn(async move { store.initialize().await })
        };
        while !backend.calls().iter().any(|c| c == "refresh") {
            tokio::task::yield_now().await;
        }

        // Refresh in flight: no signed-out state may be visible yet.
        let pending = store.state();
        assert_eq!(store.status(), AuthStatus::Unknown);
        assert!(pending.is_initializing());
        assert_eq!(check_access(&pending, &[]), Access::Pending);
        assert_eq!(persisted(&persistence), Some(expired));

        gate.notify_one();
        init.await.unwrap();

        assert_eq!(store.status(), AuthStatus::Authenticated);
        assert_eq!(check_access(&store.state(), &[Role::ShippingPlanner]), Access::Granted);
    }

    #[tokio::test]
    async fn test_init_refreshed_token_rejected_by_identity_fetch() {
        let backend = Arc::new(FakeBackend::default());
        let expired = token_expiring_in(-Duration::minutes(10), "u1");
        *backend.refresh_token.lock().unwrap() = Some(token_expiring_in(Duration::hours(1), "u1"));
        let persistence = Arc::new(MemoryTokenStore::with_token(expired));
        let store = store_with(&backend, &persistence);

        store.initialize().await;

        assert_signed_out(&store, &persistence);
    }

    #[tokio::test]
    async fn test_init_runs_only_once() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;
        let calls_after_first = backend.calls().len();

        store.initialize().await;

        assert_eq!(backend.calls().len(), calls_after_first);
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_wait_ready_observes_resting_state() {
        let backend = Arc::new(FakeBackend::default());
        *backend.identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::with_token(token_expiring_in(
            Duration::hours(1),
            "u1",
        )));
        let store = Arc::new(store_with(&backend, &persistence));

        let init = {
            let store = store.clone();
            tokio::spawn(async move { store.initialize().await })
        };
        let ready = store.wait_ready().await;
        init.await.unwrap();

        assert!(!ready.is_initializing());
        assert!(ready.is_authenticated());
    }

    #[tokio::test]
    async fn test_subscriber_sees_authenticated_after_refresh() {
        let backend = Arc::new(FakeBackend::default());
        *backend.refresh_token.lock().unwrap() = Some(token_expiring_in(Duration::hours(1), "u1"));
        *backend.identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::with_token(token_expiring_in(
            -Duration::minutes(1),
            "u1",
        )));
        let store = store_with(&backend, &persistence);
        let mut rx = store.subscribe();

        store.initialize().await;

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.status(), AuthStatus::Authenticated);
    }

    // -------------------------------------------------------------------------
    // Login
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_success() {
        let backend = Arc::new(FakeBackend::default());
        let t1 = token_expiring_in(Duration::hours(1), "u1");
        *backend.login_token.lock().unwrap() = Some(t1.clone());
        *backend.login_identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        backend.set_sessions(Some(vec![session("s1")]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;

        let identity = store
            .login("a@b.com", "validpass", Role::MinePlanner)
            .await
            .expect("login succeeds");

        assert_eq!(identity.id, "u1");
        let state = store.state();
        assert_eq!(state.token.as_ref().map(|t| t.as_str()), Some(t1.as_str()));
        assert_eq!(state.identity.as_ref().map(|i| i.id.as_str()), Some("u1"));
        assert!(state.is_authenticated());
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(persisted(&persistence), Some(t1));
    }

    #[tokio::test]
    async fn test_login_failure_changes_nothing() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;
        let before = store.state();

        let err = store
            .login("a@b.com", "wrongpass", Role::ShippingPlanner)
            .await
            .expect_err("login fails");

        assert!(matches!(err, AuthError::Api(ApiError::Unauthorized(ref m)) if m == "Invalid credentials"));
        assert_eq!(store.state(), before);
        assert_eq!(persisted(&persistence), None);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, token) = signed_in_store(&backend, &persistence).await;
        let before = store.state();

        assert!(store.login("other@b.com", "nope", Role::MinePlanner).await.is_err());

        assert_eq!(store.state(), before);
        assert_eq!(persisted(&persistence), Some(token));
    }

    #[tokio::test]
    async fn test_login_with_malformed_token_is_rejected_whole() {
        let backend = Arc::new(FakeBackend::default());
        *backend.login_token.lock().unwrap() = Some("opaque".to_string());
        *backend.login_identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;

        let err = store.login("a@b.com", "validpass", Role::MinePlanner).await;

        assert!(matches!(err, Err(AuthError::InvalidToken(_))));
        assert!(store.identity().is_none());
        assert!(store.token().is_none());
        assert_eq!(persisted(&persistence), None);
    }

    #[tokio::test]
    async fn test_login_requires_all_fields() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);

        assert!(matches!(
            store.login("  ", "pass", Role::MinePlanner).await,
            Err(AuthError::MissingField("email"))
        ));
        assert!(matches!(
            store.login("a@b.com", "", Role::MinePlanner).await,
            Err(AuthError::MissingField("password"))
        ));
        assert!(backend.calls().is_empty());
    }

    // -------------------------------------------------------------------------
    // Logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_logout_clears_even_when_backend_fails() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![session("s1")]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;
        backend.logout_fails.store(true, Ordering::SeqCst);

        store.logout().await;

        assert_signed_out(&store, &persistence);
        assert!(backend.calls().contains(&"logout".to_string()));
    }

    #[tokio::test]
    async fn test_logout_when_signed_out_is_idempotent() {
        let backend = Arc::new(FakeBackend::default());
        backend.logout_fails.store(true, Ordering::SeqCst);
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;

        store.logout().await;
        let first = store.state();
        store.logout().await;

        assert_eq!(store.state(), first);
        assert_signed_out(&store, &persistence);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_logout_cancelled_midway_still_clears() {
        struct HangingLogout(FakeBackend);

        #[async_trait]
        impl AuthBackend for HangingLogout {
            async fn login(&self, c: &LoginCredentials) -> Result<LoginResponse, ApiError> {
                self.0.login(c).await
            }
            async fn logout(&self, _token: &str) -> Result<(), ApiError> {
                std::future::pending().await
            }
            async fn refresh(&self, t: &str) -> Result<String, ApiError> {
                self.0.refresh(t).await
            }
            async fn current_identity(&self, t: &str) -> Result<Identity, ApiError> {
                self.0.current_identity(t).await
            }
            async fn sessions(&self, t: &str) -> Result<Vec<SessionRecord>, ApiError> {
                self.0.sessions(t).await
            }
            async fn revoke_session(&self, t: &str, id: &str) -> Result<(), ApiError> {
                self.0.revoke_session(t, id).await
            }
            async fn register(&self, k: AccountKind, r: &Registration) -> Result<(), ApiError> {
                self.0.register(k, r).await
            }
        }

        let inner = FakeBackend::default();
        *inner.identity.lock().unwrap() = Some(identity("u1", Role::MinePlanner));
        inner.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::with_token(token_expiring_in(
            Duration::hours(1),
            "u1",
        )));
        let store = SessionStore::new(Arc::new(HangingLogout(inner)), persistence.clone());
        store.initialize().await;
        assert!(store.is_authenticated());

        // Drop the logout future before the backend ever answers.
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), store.logout()).await;
        assert!(timed_out.is_err());

        assert_signed_out(&store, &persistence);
    }

    // -------------------------------------------------------------------------
    // Identity refresh
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_user_replaces_identity() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;

        let mut updated = identity("u1", Role::MinePlanner);
        updated.display_name = "Renamed Planner".to_string();
        *backend.identity.lock().unwrap() = Some(updated);

        let identity = store.refresh_user().await.expect("refresh succeeds");
        assert_eq!(identity.display_name, "Renamed Planner");
        assert_eq!(store.identity().map(|i| i.display_name), Some("Renamed Planner".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_user_rejected_signs_out() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;
        *backend.identity.lock().unwrap() = None;

        let err = store.refresh_user().await.expect_err("identity rejected");

        assert!(matches!(err, AuthError::Api(ApiError::Unauthorized(_))));
        assert_signed_out(&store, &persistence);
    }

    #[tokio::test]
    async fn test_refresh_user_requires_token() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;

        assert!(matches!(store.refresh_user().await, Err(AuthError::NotAuthenticated)));
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_load_sessions_replaces_snapshot() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![session("a"), session("b")]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;

        backend.set_sessions(Some(vec![session("c")]));
        store.load_sessions().await.expect("load succeeds");

        let ids: Vec<String> = store.state().sessions.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[tokio::test]
    async fn test_load_sessions_failure_keeps_snapshot_and_auth() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![session("a")]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;

        backend.set_sessions(None);
        let err = store.load_sessions().await.expect_err("load fails");

        assert!(matches!(err, AuthError::Api(ApiError::Unauthorized(_))));
        assert!(store.is_authenticated());
        assert_eq!(store.state().sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_session_resyncs() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![session("s1"), session("s123")]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;

        store.revoke_session("s123").await.expect("revoke succeeds");

        let state = store.state();
        assert!(state.sessions.iter().all(|s| s.id != "s123"));
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(backend.calls().last().map(String::as_str), Some("sessions"));
    }

    #[tokio::test]
    async fn test_revoke_failure_leaves_snapshot() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_sessions(Some(vec![session("s1"), session("s123")]));
        let persistence = Arc::new(MemoryTokenStore::new());
        let (store, _) = signed_in_store(&backend, &persistence).await;
        backend.revoke_fails.store(true, Ordering::SeqCst);
        let calls_before = backend.calls().len();

        let err = store.revoke_session("s123").await.expect_err("revoke fails");

        assert!(matches!(err, AuthError::Api(ApiError::NotFound(_))));
        assert_eq!(store.state().sessions.len(), 2);
        assert!(store.is_authenticated());
        // No reload after a failed revoke
        assert_eq!(backend.calls().len(), calls_before + 1);
    }

    #[tokio::test]
    async fn test_session_operations_require_sign_in() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;

        assert!(matches!(store.load_sessions().await, Err(AuthError::NotAuthenticated)));
        assert!(matches!(store.revoke_session("s1").await, Err(AuthError::NotAuthenticated)));
        assert!(matches!(store.revoke_session(" ").await, Err(AuthError::MissingField(_))));
        assert!(backend.calls().is_empty());
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_register_does_not_sign_in() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);
        store.initialize().await;
        let before = store.state();

        let registration = Registration {
            display_name: "Dewi".to_string(),
            email: "dewi@example.com".to_string(),
            password: "secret123".to_string(),
            phone: Some("0811".to_string()),
        };
        store
            .register(AccountKind::Shipping, &registration)
            .await
            .expect("register succeeds");

        assert_eq!(store.state(), before);
        assert_eq!(backend.calls(), vec!["register:shipping"]);
    }

    #[tokio::test]
    async fn test_register_validates_fields() {
        let backend = Arc::new(FakeBackend::default());
        let persistence = Arc::new(MemoryTokenStore::new());
        let store = store_with(&backend, &persistence);

        let registration = Registration {
            display_name: String::new(),
            email: "dewi@example.com".to_string(),
            password: "secret123".to_string(),
            phone: None,
        };
        assert!(matches!(
            store.register(AccountKind::Mine, &registration).await,
            Err(AuthError::MissingField("name"))
        ));
        assert!(backend.calls().is_empty());
    }
}
