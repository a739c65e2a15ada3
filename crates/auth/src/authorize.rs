use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::permissions::Capability;
use crate::principal::Principal;
use crate::roles::Role;
use crate::subscription::{self, InvalidReason};

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// Answers "why was this allowed/denied?" for audit and support tooling. The
/// `granted` bit always agrees with [`crate::permissions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub capability: Capability,
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    /// Role of the principal, if any.
    pub role: Option<Role>,

    /// If denied, this explains what was missing.
    pub denial: Option<DenialReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotSignedIn,
    SubscriptionInvalid,
    InsufficientRole,
}

/// Explain whether `principal` holds `capability` at `now`.
pub fn explain(principal: Option<&Principal>, capability: Capability, now: DateTime<Utc>) -> Decision {
    let Some(principal) = principal else {
        return denied(
            capability,
            None,
            DenialKind::NotSignedIn,
            "No signed-in user".to_string(),
        );
    };
    let role = principal.role();

    if principal.is_platform_operator() {
        return Decision {
            capability,
            granted: true,
            reason: format!("Role '{role}' is platform operations staff and bypasses tenant checks"),
            role: Some(role),
            denial: None,
        };
    }

    let verdict = subscription::validate(principal.company(), now);
    if !verdict.valid {
        let reason = verdict.reason.unwrap_or(InvalidReason::UnknownStatus);
        return denied(capability, Some(role), DenialKind::SubscriptionInvalid, reason.message());
    }

    let required = capability.required_role();
    if !role.at_least(required) {
        return denied(
            capability,
            Some(role),
            DenialKind::InsufficientRole,
            format!("'{capability}' requires role '{required}' or above; current role is '{role}'"),
        );
    }

    Decision {
        capability,
        granted: true,
        reason: format!("Role '{role}' meets '{required}' and the subscription is valid"),
        role: Some(role),
        denial: None,
    }
}

fn denied(capability: Capability, role: Option<Role>, kind: DenialKind, message: String) -> Decision {
    Decision {
        capability,
        granted: false,
        reason: message.clone(),
        role,
        denial: Some(DenialReason { kind, message }),
    }
}
