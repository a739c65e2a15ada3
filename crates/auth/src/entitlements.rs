//! Plan-driven entitlements: feature switches and usage limits.
//!
//! Both answers are total functions. Missing companies, plans or keys deny;
//! nothing here returns an error or panics.

use serde::Serialize;

use crate::plan::LimitValue;
use crate::principal::Principal;
use crate::subscription::SubscriptionStatus;

/// Denial reason for limits the plan does not grant.
pub const NOT_IN_PLAN: &str = "not available in current plan";

/// Whether `principal` may use the plan feature `key`.
pub fn feature_access(principal: &Principal, key: &str) -> bool {
    if principal.is_platform_operator() {
        return true;
    }

    let Some(company) = principal.company() else {
        return false;
    };
    if !company.is_active || company.is_suspended {
        return false;
    }
    if matches!(
        company.subscription_status,
        SubscriptionStatus::Cancelled | SubscriptionStatus::Suspended
    ) {
        return false;
    }

    principal
        .plan()
        .map(|plan| plan.feature(key).is_enabled())
        .unwrap_or(false)
}

/// Answer for a usage-limited resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageLimit {
    pub allowed: bool,
    pub limit: Option<u64>,
    pub unlimited: bool,
    pub reason: Option<String>,
}

impl UsageLimit {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: None,
            unlimited: true,
            reason: None,
        }
    }

    pub fn capped(limit: u64) -> Self {
        Self {
            allowed: true,
            limit: Some(limit),
            unlimited: false,
            reason: None,
        }
    }

    pub fn not_in_plan() -> Self {
        Self {
            allowed: false,
            limit: None,
            unlimited: false,
            reason: Some(NOT_IN_PLAN.to_string()),
        }
    }

    /// Whether one more unit fits when `current_usage` units are already used.
    pub fn permits(&self, current_usage: u64) -> bool {
        if !self.allowed {
            return false;
        }
        if self.unlimited {
            return true;
        }
        self.limit.is_some_and(|limit| current_usage < limit)
    }
}

/// Resolve the plan limit `key` for `principal`.
pub fn usage_limit(principal: &Principal, key: &str) -> UsageLimit {
    if principal.is_platform_operator() {
        return UsageLimit::unlimited();
    }

    match principal.plan().map(|plan| plan.limit(key)) {
        Some(LimitValue::Unlimited) => UsageLimit::unlimited(),
        Some(LimitValue::Finite(limit)) => UsageLimit::capped(limit),
        Some(LimitValue::Unavailable) | None => UsageLimit::not_in_plan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegate_core::{CompanyId, UserId};

    use crate::identity::Identity;
    use crate::plan::{FeatureValue, SubscriptionPlan};
    use crate::principal::{Company, Profile};
    use crate::roles::Role;

    fn plan() -> SubscriptionPlan {
        SubscriptionPlan::new("Professional")
            .with_feature("drawings", FeatureValue::Flag(true))
            .with_feature("risk_dashboard", FeatureValue::Flag(false))
            .with_feature("contractor_portal", FeatureValue::Quota(5.0))
            .with_limit("projects", LimitValue::Finite(10))
            .with_limit("users", LimitValue::Unlimited)
    }

    fn principal_with(role: Role, company: Option<Company>) -> Principal {
        let user = UserId::new();
        let mut profile = Profile::new(user, role, company);
        if profile.company_id.is_none() && !role.is_platform_operator() {
            profile.company_id = Some(CompanyId::new());
        }
        Principal::new(Identity::new(user), profile).unwrap()
    }

    fn company(status: SubscriptionStatus) -> Company {
        Company::new(CompanyId::new(), "Acme", "acme", status).with_plan(plan())
    }

    #[test]
    fn features_follow_plan_map() {
        let p = principal_with(Role::FieldWorker, Some(company(SubscriptionStatus::Active)));
        assert!(feature_access(&p, "drawings"));
        assert!(feature_access(&p, "contractor_portal"));
        assert!(!feature_access(&p, "risk_dashboard"));
        assert!(!feature_access(&p, "unheard_of"));
    }

    #[test]
    fn company_state_blocks_features() {
        let mut suspended = company(SubscriptionStatus::Active);
        suspended.is_suspended = true;
        let mut inactive = company(SubscriptionStatus::Active);
        inactive.is_active = false;

        for c in [
            suspended,
            inactive,
            company(SubscriptionStatus::Cancelled),
            company(SubscriptionStatus::Suspended),
        ] {
            let p = principal_with(Role::CompanyOwner, Some(c));
            assert!(!feature_access(&p, "drawings"));
        }

        let orphan = principal_with(Role::CompanyOwner, None);
        assert!(!feature_access(&orphan, "drawings"));
    }

    #[test]
    fn super_admin_has_every_feature() {
        let p = principal_with(Role::SuperAdmin, None);
        assert!(feature_access(&p, "anything"));
    }

    #[test]
    fn limits_follow_plan_map() {
        let p = principal_with(Role::ProjectManager, Some(company(SubscriptionStatus::Active)));
        assert_eq!(usage_limit(&p, "projects"), UsageLimit::capped(10));
        assert_eq!(usage_limit(&p, "users"), UsageLimit::unlimited());

        let missing = usage_limit(&p, "drawings");
        assert!(!missing.allowed);
        assert_eq!(missing.reason.as_deref(), Some(NOT_IN_PLAN));
    }

    #[test]
    fn super_admin_is_unlimited_without_company() {
        let p = principal_with(Role::SuperAdmin, None);
        let limit = usage_limit(&p, "projects");
        assert!(limit.allowed);
        assert!(limit.unlimited);
    }

    #[test]
    fn permits_checks_remaining_headroom() {
        assert!(UsageLimit::capped(3).permits(2));
        assert!(!UsageLimit::capped(3).permits(3));
        assert!(UsageLimit::unlimited().permits(u64::MAX));
        assert!(!UsageLimit::not_in_plan().permits(0));
    }
}
