//! Session loader: keeps the current principal in step with the identity provider.
//!
//! Loads may overlap (sign-in storms, manual reloads, a sign-out racing a slow
//! profile fetch). Every load and every sign-out draws a token from one
//! monotonically increasing counter. A finished load is committed only if
//!
//! - no load that started later has already committed, and
//! - no sign-out covering its identity happened after it started.
//!
//! The event follower never waits on a profile fetch: a sign-in draws its
//! token as soon as the event is read and resolves on its own task, so a
//! sign-out read right after it is applied immediately.
//!
//! The principal is swapped as a whole `Arc`, so readers see either the
//! previous principal or the new one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use sitegate_auth::{AuthEvent, AuthStateChange, Identity, Principal, Profile, TokenValidationError, validate_identity};
use sitegate_core::{DomainError, UserId};

use crate::clock::Clock;
use crate::identity::{IdentityError, IdentityProvider};
use crate::store::{ProfileStore, StoreError};

pub type ListenerId = u64;

/// Auth transition callback. Receives the event and the profile now current
/// (`None` after a sign-out or a failed load).
pub type AuthListener = Arc<dyn Fn(AuthEvent, Option<&Profile>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session loader already initialized")]
    AlreadyInitialized,

    #[error("no active session")]
    NoSession,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("session rejected: {0}")]
    Token(#[from] TokenValidationError),

    #[error("no profile found for user {0}")]
    ProfileNotFound(UserId),

    #[error("profile fetch failed: {0}")]
    Store(#[from] StoreError),

    #[error("profile rejected: {0}")]
    InvalidProfile(#[from] DomainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

/// Result of a load that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The load committed; this is now the current principal.
    Loaded(Arc<Principal>),
    /// A newer load or a sign-out overtook this one; its result was dropped.
    Superseded,
}

/// Point-in-time view of the loader.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub principal: Option<Arc<Principal>>,
    /// Bumped on every principal swap, including clears.
    pub version: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    principal: Option<Arc<Principal>>,
    version: u64,
    issued: u64,
    committed: u64,
    global_sign_out: u64,
    sign_outs: HashMap<UserId, u64>,
    in_flight: usize,
    initialized: bool,
}

impl SessionState {
    fn next_token(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn accepts(&self, token: u64, user_id: UserId) -> bool {
        token > self.committed
            && token > self.global_sign_out
            && self.sign_outs.get(&user_id).is_none_or(|at| token > *at)
    }

    fn commit(&mut self, token: u64, principal: Option<Arc<Principal>>) {
        self.committed = token;
        self.principal = principal;
        self.version += 1;
        // Sign-outs older than the committed load can no longer reject anything.
        let committed = self.committed;
        self.sign_outs.retain(|_, at| *at > committed);
    }

    /// Record a sign-out and drop the principal it covers. Returns whether a
    /// principal was cleared.
    fn revoke(&mut self, user_id: Option<UserId>) -> bool {
        let at = self.next_token();
        let covered = match user_id {
            Some(user_id) => {
                self.sign_outs.insert(user_id, at);
                self.principal.as_ref().is_none_or(|current| current.id() == user_id)
            }
            None => {
                self.global_sign_out = at;
                true
            }
        };
        let cleared = covered && self.principal.take().is_some();
        if cleared {
            self.version += 1;
        }
        self.settle();
        cleared
    }

    fn settle(&mut self) {
        if self.in_flight == 0 {
            self.status = SessionStatus::Ready;
        }
    }
}

pub struct SessionLoader {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    listeners: Mutex<Vec<(ListenerId, AuthListener)>>,
    next_listener: Mutex<ListenerId>,
}

impl std::fmt::Debug for SessionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLoader")
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl SessionLoader {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            profiles,
            clock,
            state: Mutex::new(SessionState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        }
    }

    /// Load the current session and start following the provider's event stream.
    ///
    /// The subscription is taken before the session is read so no transition
    /// between the two is lost. Provider failures leave the loader `Ready` and
    /// signed out. The returned handle can be aborted to stop following events.
    pub async fn initialize(self: &Arc<Self>) -> Result<JoinHandle<()>, SessionError> {
        {
            let mut state = self.lock_state();
            if state.initialized {
                return Err(SessionError::AlreadyInitialized);
            }
            state.initialized = true;
        }

        let mut events = self.identity.subscribe();
        self.sync_with_provider().await;

        let loader = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => loader.dispatch(change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth event stream lagged; resyncing with provider");
                        loader.sync_with_provider().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("auth event stream closed");
                        break;
                    }
                }
            }
        }))
    }

    /// Resolve `identity` into a principal and commit it unless overtaken.
    ///
    /// A failed load that is still current clears the principal (fail closed)
    /// and returns the error.
    pub async fn load_context(&self, identity: Identity) -> Result<LoadOutcome, SessionError> {
        let token = self.begin_load();
        self.finish_load(token, identity).await
    }

    fn begin_load(&self) -> u64 {
        let mut state = self.lock_state();
        state.in_flight += 1;
        state.status = SessionStatus::Loading;
        state.next_token()
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    async fn finish_load(&self, token: u64, identity: Identity) -> Result<LoadOutcome, SessionError> {
        let user_id = identity.id;
        let resolved = self.resolve(identity).await;

        let mut state = self.lock_state();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.settle();

        if !state.accepts(token, user_id) {
            debug!(token, failed = resolved.is_err(), "discarding superseded session load");
            return Ok(LoadOutcome::Superseded);
        }

        match resolved {
            Ok(principal) => {
                let principal = Arc::new(principal);
                state.commit(token, Some(Arc::clone(&principal)));
                drop(state);
                info!(role = %principal.role(), company_id = ?principal.company_id(), "session loaded");
                Ok(LoadOutcome::Loaded(principal))
            }
            Err(err) => {
                state.commit(token, None);
                drop(state);
                warn!(error = %err, "session load failed; principal cleared");
                Err(err)
            }
        }
    }

    /// Re-fetch the current principal's profile (e.g. after a plan change).
    pub async fn reload(&self) -> Result<LoadOutcome, SessionError> {
        let identity = self
            .current()
            .map(|principal| principal.identity().clone())
            .ok_or(SessionError::NoSession)?;
        self.load_context(identity).await
    }

    /// Record a sign-out and notify listeners.
    ///
    /// With a user id only that user's in-flight loads are invalidated and the
    /// principal is cleared only if it belongs to that user, so a sign-in for
    /// someone else that is underway or already committed survives. Without
    /// one the principal and every in-flight load are dropped.
    pub fn sign_out(&self, user_id: Option<UserId>) {
        let current = {
            let mut state = self.lock_state();
            state.revoke(user_id);
            state.principal.clone()
        };
        self.notify(AuthEvent::SignedOut, current.as_deref().map(Principal::profile));
    }

    /// Drop the principal and every in-flight load.
    pub fn clear(&self) {
        self.sign_out(None);
    }

    /// Apply one provider transition and notify listeners.
    pub async fn handle_auth_event(&self, change: AuthStateChange) {
        match change.event {
            AuthEvent::SignedIn => {
                let Some(identity) = change.identity else {
                    warn!("sign-in event without identity ignored");
                    return;
                };
                let token = self.begin_load();
                self.complete_sign_in(token, identity).await;
            }
            AuthEvent::SignedOut => self.apply_sign_out(&change),
        }
    }

    pub fn current(&self) -> Option<Arc<Principal>> {
        self.lock_state().principal.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            status: state.status,
            principal: state.principal.clone(),
            version: state.version,
        }
    }

    pub fn on_auth_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(AuthEvent, Option<&Profile>) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_listener.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if no listener had that id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    async fn resolve(&self, identity: Identity) -> Result<Principal, SessionError> {
        validate_identity(&identity, self.clock.now())?;
        let profile = self
            .profiles
            .fetch_profile(identity.id)
            .await?
            .ok_or(SessionError::ProfileNotFound(identity.id))?;
        Ok(Principal::new(identity, profile)?)
    }

    /// Follower-side dispatch. Sign-ins take their token here, in event order,
    /// and resolve on their own task.
    fn dispatch(self: &Arc<Self>, change: AuthStateChange) {
        match change.event {
            AuthEvent::SignedIn => {
                let Some(identity) = change.identity else {
                    warn!("sign-in event without identity ignored");
                    return;
                };
                let token = self.begin_load();
                let loader = Arc::clone(self);
                tokio::spawn(async move { loader.complete_sign_in(token, identity).await });
            }
            AuthEvent::SignedOut => self.apply_sign_out(&change),
        }
    }

    async fn complete_sign_in(&self, token: u64, identity: Identity) {
        match self.finish_load(token, identity).await {
            Ok(LoadOutcome::Loaded(principal)) => {
                self.notify(AuthEvent::SignedIn, Some(principal.profile()));
            }
            Ok(LoadOutcome::Superseded) => {}
            // Already logged; the principal is empty.
            Err(_) => self.notify(AuthEvent::SignedIn, None),
        }
    }

    fn apply_sign_out(&self, change: &AuthStateChange) {
        let user_id = change.identity.as_ref().map(|identity| identity.id);
        info!(?user_id, "signed out");
        self.sign_out(user_id);
    }

    /// Bring the principal in line with the provider's current session.
    /// Listeners hear about a restored session, and about a sign-out only if
    /// a principal was actually dropped.
    async fn sync_with_provider(&self) {
        match self.identity.get_session().await {
            Ok(Some(identity)) => {
                let token = self.begin_load();
                self.complete_sign_in(token, identity).await;
            }
            Ok(None) => self.drop_session(),
            Err(err) => {
                warn!(error = %err, "identity provider unavailable; treating as signed out");
                self.drop_session();
            }
        }
    }

    fn drop_session(&self) {
        let cleared = self.lock_state().revoke(None);
        if cleared {
            self.notify(AuthEvent::SignedOut, None);
        }
    }

    fn notify(&self, event: AuthEvent, profile: Option<&Profile>) {
        // Snapshot so callbacks run without the lock held.
        let listeners: Vec<AuthListener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event, profile);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, AuthListener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sitegate_auth::{Company, Role, SubscriptionStatus};
    use sitegate_core::CompanyId;

    use crate::clock::FixedClock;
    use crate::identity::InMemoryIdentityProvider;
    use crate::store::InMemoryStore;

    fn loader(store: Arc<InMemoryStore>) -> SessionLoader {
        SessionLoader::new(
            Arc::new(InMemoryIdentityProvider::new()),
            store,
            Arc::new(FixedClock::new(Utc::now())),
        )
    }

    fn seed(store: &InMemoryStore, role: Role) -> Identity {
        let user = UserId::new();
        let company = Company::new(CompanyId::new(), "Acme", "acme", SubscriptionStatus::Active);
        store.put_profile(Profile::new(user, role, Some(company)));
        Identity::new(user)
    }

    #[test]
    fn state_accepts_only_newer_uncovered_tokens() {
        let user = UserId::new();
        let mut state = SessionState::default();
        let first = state.next_token();
        let second = state.next_token();

        state.commit(second, None);
        assert!(!state.accepts(first, user));

        let third = state.next_token();
        let sign_out = state.next_token();
        state.sign_outs.insert(user, sign_out);
        assert!(!state.accepts(third, user));
        assert!(state.accepts(third, UserId::new()));
    }

    #[test]
    fn scoped_revoke_keeps_someone_elses_principal() {
        let bob = UserId::new();
        let company = Company::new(CompanyId::new(), "Acme", "acme", SubscriptionStatus::Active);
        let principal = Principal::new(Identity::new(bob), Profile::new(bob, Role::FieldWorker, Some(company))).unwrap();

        let mut state = SessionState::default();
        let token = state.next_token();
        state.commit(token, Some(Arc::new(principal)));

        let alice = UserId::new();
        assert!(!state.revoke(Some(alice)));
        assert_eq!(state.principal.as_ref().map(|p| p.id()), Some(bob));
        assert_eq!(state.version, 1);

        assert!(state.revoke(Some(bob)));
        assert!(state.principal.is_none());
        assert_eq!(state.version, 2);
    }

    #[tokio::test]
    async fn clear_notifies_listeners() {
        let store = Arc::new(InMemoryStore::new());
        let identity = seed(&store, Role::Supervisor);
        let loader = loader(Arc::clone(&store));
        loader.load_context(identity).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        loader.on_auth_state_change(move |event, profile| {
            sink.lock().unwrap().push((event, profile.is_some()));
        });

        loader.clear();
        assert!(loader.current().is_none());
        assert_eq!(*seen.lock().unwrap(), vec![(AuthEvent::SignedOut, false)]);
    }

    #[tokio::test]
    async fn load_commits_principal_and_bumps_version() {
        let store = Arc::new(InMemoryStore::new());
        let identity = seed(&store, Role::Supervisor);
        let loader = loader(Arc::clone(&store));

        let outcome = loader.load_context(identity.clone()).await.unwrap();
        let LoadOutcome::Loaded(principal) = outcome else {
            panic!("expected committed load");
        };
        assert_eq!(principal.id(), identity.id);

        let snapshot = loader.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.principal.map(|p| p.role()), Some(Role::Supervisor));
    }

    #[tokio::test]
    async fn missing_profile_clears_principal() {
        let store = Arc::new(InMemoryStore::new());
        let identity = seed(&store, Role::FieldWorker);
        let loader = loader(Arc::clone(&store));
        loader.load_context(identity.clone()).await.unwrap();

        store.remove_profile(identity.id);
        let err = loader.reload().await.unwrap_err();
        assert!(matches!(err, SessionError::ProfileNotFound(id) if id == identity.id));
        assert!(loader.current().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_rejected_before_fetching() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let identity = seed(&store, Role::FieldWorker)
            .with_window(now - Duration::hours(2), now - Duration::hours(1));
        let loader = loader(Arc::clone(&store));

        let err = loader.load_context(identity).await.unwrap_err();
        assert!(matches!(err, SessionError::Token(TokenValidationError::Expired)));
    }

    #[tokio::test]
    async fn profile_without_company_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        store.put_profile(Profile::new(user, Role::Supervisor, None));
        let loader = loader(Arc::clone(&store));

        let err = loader.load_context(Identity::new(user)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidProfile(DomainError::MissingCompany { user_id, .. }) if user_id == user
        ));
        assert!(loader.current().is_none());
    }

    #[tokio::test]
    async fn reload_without_session_errors() {
        let loader = loader(Arc::new(InMemoryStore::new()));
        assert!(matches!(loader.reload().await, Err(SessionError::NoSession)));
    }

    #[tokio::test]
    async fn listeners_can_be_removed() {
        let store = Arc::new(InMemoryStore::new());
        let identity = seed(&store, Role::ProjectManager);
        let loader = loader(Arc::clone(&store));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = loader.on_auth_state_change(move |event, profile| {
            sink.lock().unwrap().push((event, profile.map(|p| p.id)));
        });

        loader.handle_auth_event(AuthStateChange::signed_in(identity.clone())).await;
        assert!(loader.remove_listener(id));
        assert!(!loader.remove_listener(id));
        loader.handle_auth_event(AuthStateChange::signed_out(Some(identity.clone()))).await;

        assert_eq!(*seen.lock().unwrap(), vec![(AuthEvent::SignedIn, Some(identity.id))]);
        assert!(loader.current().is_none());
    }
}
