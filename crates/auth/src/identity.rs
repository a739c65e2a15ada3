use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sitegate_core::UserId;

/// An authenticated identity as handed over by the identity provider.
///
/// The provider's token is opaque to this layer; only the subject and the
/// validity window are interpreted. Everything else the provider returned is
/// kept verbatim in `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject; doubles as the `user_profiles` primary key.
    pub id: UserId,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub raw: JsonValue,
}

impl Identity {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            issued_at: None,
            expires_at: None,
            raw: JsonValue::Null,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_window(mut self, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate an identity's session window.
///
/// Missing bounds are not checked: the provider only vouched for what it sent.
/// Signature verification of the underlying token is outside this crate.
pub fn validate_identity(identity: &Identity, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if let (Some(issued_at), Some(expires_at)) = (identity.issued_at, identity.expires_at) {
        if expires_at <= issued_at {
            return Err(TokenValidationError::InvalidTimeWindow);
        }
    }
    if let Some(issued_at) = identity.issued_at {
        if now < issued_at {
            return Err(TokenValidationError::NotYetValid);
        }
    }
    if let Some(expires_at) = identity.expires_at {
        if now >= expires_at {
            return Err(TokenValidationError::Expired);
        }
    }
    Ok(())
}

/// Kind of an identity-provider transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
}

/// One event on the identity provider's "auth state changed" stream.
///
/// Sign-outs carry the identity whose session ended when the provider knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub identity: Option<Identity>,
}

impl AuthStateChange {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            event: AuthEvent::SignedIn,
            identity: Some(identity),
        }
    }

    pub fn signed_out(identity: Option<Identity>) -> Self {
        Self {
            event: AuthEvent::SignedOut,
            identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn window_checks() {
        let now = Utc::now();
        let base = Identity::new(UserId::new());

        assert_eq!(validate_identity(&base, now), Ok(()));

        let live = base.clone().with_window(now - Duration::minutes(5), now + Duration::minutes(5));
        assert_eq!(validate_identity(&live, now), Ok(()));

        let expired = base.clone().with_window(now - Duration::minutes(10), now);
        assert_eq!(validate_identity(&expired, now), Err(TokenValidationError::Expired));

        let future = base.clone().with_window(now + Duration::minutes(1), now + Duration::minutes(10));
        assert_eq!(validate_identity(&future, now), Err(TokenValidationError::NotYetValid));

        let inverted = base.with_window(now, now - Duration::minutes(1));
        assert_eq!(validate_identity(&inverted, now), Err(TokenValidationError::InvalidTimeWindow));
    }
}
