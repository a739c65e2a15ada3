use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sitegate_core::{CompanyId, DomainError, DomainResult, UserId};

use crate::identity::Identity;
use crate::plan::SubscriptionPlan;
use crate::roles::Role;
use crate::subscription::SubscriptionStatus;

/// A tenant: an isolated customer organization.
///
/// `is_suspended = true` forces every entitlement to deny, whatever the
/// subscription status says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub slug: String,
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Missing flags decode as inactive.
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default, alias = "subscription_plans")]
    pub subscription_plan: Option<SubscriptionPlan>,
}

impl Company {
    /// An active, unsuspended company without a plan.
    pub fn new(
        id: CompanyId,
        name: impl Into<String>,
        slug: impl Into<String>,
        subscription_status: SubscriptionStatus,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            slug: slug.into(),
            subscription_status,
            trial_ends_at: None,
            is_active: true,
            is_suspended: false,
            subscription_plan: None,
        }
    }

    pub fn with_plan(mut self, plan: SubscriptionPlan) -> Self {
        self.subscription_plan = Some(plan);
        self
    }

    pub fn with_trial_ending(mut self, ends_at: DateTime<Utc>) -> Self {
        self.trial_ends_at = Some(ends_at);
        self
    }
}

/// The durable record behind an authenticated user (`user_profiles` row with
/// its company and plan embedded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub role: Role,
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default, alias = "companies")]
    pub company: Option<Company>,
}

impl Profile {
    pub fn new(id: UserId, role: Role, company: Option<Company>) -> Self {
        Self {
            id,
            role,
            company_id: company.as_ref().map(|c| c.id),
            email: None,
            full_name: None,
            company,
        }
    }

    /// Check the profile invariants.
    ///
    /// - every role below the top tier carries a company id
    /// - an embedded company matches that id
    pub fn validate(&self) -> DomainResult<()> {
        if !self.role.is_platform_operator() && self.company_id.is_none() {
            return Err(DomainError::MissingCompany {
                user_id: self.id,
                role: self.role.to_string(),
            });
        }
        if let (Some(company_id), Some(company)) = (self.company_id, self.company.as_ref()) {
            if company.id != company_id {
                return Err(DomainError::CompanyMismatch {
                    user_id: self.id,
                    company_id,
                    embedded: company.id,
                });
            }
        }
        Ok(())
    }
}

/// A fully resolved principal for authorization decisions.
///
/// Built once per successful session resolution and replaced wholesale; there
/// are no mutators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    id: UserId,
    identity: Identity,
    profile: Profile,
}

impl Principal {
    /// Pair an identity with its profile, enforcing the profile invariants.
    pub fn new(identity: Identity, profile: Profile) -> DomainResult<Self> {
        if identity.id != profile.id {
            return Err(DomainError::IdentityMismatch {
                identity: identity.id,
                profile: profile.id,
            });
        }
        profile.validate()?;
        Ok(Self {
            id: identity.id,
            identity,
            profile,
        })
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn role(&self) -> Role {
        self.profile.role
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.profile.company_id
    }

    pub fn company(&self) -> Option<&Company> {
        self.profile.company.as_ref()
    }

    pub fn plan(&self) -> Option<&SubscriptionPlan> {
        self.company().and_then(|c| c.subscription_plan.as_ref())
    }

    pub fn is_platform_operator(&self) -> bool {
        self.profile.role.is_platform_operator()
    }
}
