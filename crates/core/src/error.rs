//! Domain error model.

use thiserror::Error;

use crate::id::{CompanyId, UserId};

pub type DomainResult<T> = Result<T, DomainError>;

/// Malformed identifiers and broken profile invariants.
///
/// These are data faults. Authorization denials are *not* errors; the policy
/// functions return them as ordinary values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    /// Every role below the top tier must belong to a company.
    #[error("profile {user_id} with role '{role}' has no company")]
    MissingCompany { user_id: UserId, role: String },

    #[error("profile {user_id} references company {company_id} but embeds company {embedded}")]
    CompanyMismatch {
        user_id: UserId,
        company_id: CompanyId,
        embedded: CompanyId,
    },

    /// The identity provider's subject and the loaded profile disagree.
    #[error("identity {identity} resolved to profile {profile}")]
    IdentityMismatch { identity: UserId, profile: UserId },
}
