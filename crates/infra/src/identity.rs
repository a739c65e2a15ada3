//! Identity provider seam.
//!
//! The provider owns credentials and tokens. This layer only asks it for the
//! current session and listens to its "auth state changed" stream.

use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use sitegate_auth::{AuthStateChange, Identity};

/// Buffered auth events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The current session, if one exists.
    async fn get_session(&self) -> Result<Option<Identity>, IdentityError>;

    /// Subscribe to auth state changes emitted after this call.
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// In-process identity provider for tests/dev.
///
/// `sign_in`/`sign_out` update the current session and broadcast the matching
/// event, mimicking a hosted provider's client SDK.
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    session: RwLock<Option<Identity>>,
    events: broadcast::Sender<AuthStateChange>,
    unavailable: RwLock<bool>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: RwLock::new(None),
            events,
            unavailable: RwLock::new(false),
        }
    }

    /// Start with `identity` already signed in (no event is emitted).
    pub fn with_session(identity: Identity) -> Self {
        let provider = Self::new();
        if let Ok(mut session) = provider.session.write() {
            *session = Some(identity);
        }
        provider
    }

    pub fn sign_in(&self, identity: Identity) {
        if let Ok(mut session) = self.session.write() {
            *session = Some(identity.clone());
        }
        self.emit(AuthStateChange::signed_in(identity));
    }

    /// End the current session; the event names the identity that signed out.
    pub fn sign_out(&self) {
        let previous = match self.session.write() {
            Ok(mut session) => session.take(),
            Err(_) => None,
        };
        self.emit(AuthStateChange::signed_out(previous));
    }

    /// Broadcast an arbitrary event without touching the session.
    pub fn emit(&self, change: AuthStateChange) {
        // No receivers is fine.
        let _ = self.events.send(change);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.write() {
            *flag = unavailable;
        }
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Identity>, IdentityError> {
        if self.unavailable.read().map(|flag| *flag).unwrap_or(true) {
            return Err(IdentityError::Unavailable("in-memory provider offline".to_string()));
        }
        let session = self
            .session
            .read()
            .map_err(|_| IdentityError::Unavailable("session lock poisoned".to_string()))?;
        Ok(session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegate_auth::AuthEvent;
    use sitegate_core::UserId;

    #[tokio::test]
    async fn sign_in_and_out_update_session_and_broadcast() {
        let provider = InMemoryIdentityProvider::new();
        let mut events = provider.subscribe();
        let identity = Identity::new(UserId::new());

        provider.sign_in(identity.clone());
        assert_eq!(provider.get_session().await.unwrap(), Some(identity.clone()));
        assert_eq!(events.recv().await.unwrap().event, AuthEvent::SignedIn);

        provider.sign_out();
        assert_eq!(provider.get_session().await.unwrap(), None);
        let out = events.recv().await.unwrap();
        assert_eq!(out.event, AuthEvent::SignedOut);
        assert_eq!(out.identity, Some(identity));
    }

    #[tokio::test]
    async fn offline_provider_errors() {
        let provider = InMemoryIdentityProvider::new();
        provider.set_unavailable(true);
        assert!(provider.get_session().await.is_err());
    }
}
