use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::principal::Principal;
use crate::roles::Role;
use crate::subscription::{self, InvalidReason, SubscriptionType};

/// An operation gated by role + subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageUsers,
    ManageBilling,
    ManageCompanySettings,
    ViewAuditLog,
    CreateProjects,
    ManageProjects,
    ManageContractors,
    ExportReports,
    AssignBlockers,
    UploadDrawings,
    ViewReports,
    CreateBlockers,
    ResolveBlockers,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::ManageUsers,
        Capability::ManageBilling,
        Capability::ManageCompanySettings,
        Capability::ViewAuditLog,
        Capability::CreateProjects,
        Capability::ManageProjects,
        Capability::ManageContractors,
        Capability::ExportReports,
        Capability::AssignBlockers,
        Capability::UploadDrawings,
        Capability::ViewReports,
        Capability::CreateBlockers,
        Capability::ResolveBlockers,
    ];

    /// Minimum role for the capability (on top of a valid subscription).
    pub fn required_role(&self) -> Role {
        match self {
            Capability::ManageBilling => Role::CompanyOwner,
            Capability::ManageUsers | Capability::ManageCompanySettings | Capability::ViewAuditLog => {
                Role::CompanyAdmin
            }
            Capability::CreateProjects
            | Capability::ManageProjects
            | Capability::ManageContractors
            | Capability::ExportReports => Role::ProjectManager,
            Capability::AssignBlockers | Capability::UploadDrawings | Capability::ViewReports => Role::Supervisor,
            // Any recognized role.
            Capability::CreateBlockers | Capability::ResolveBlockers => Role::FieldWorker,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ManageUsers => "manage_users",
            Capability::ManageBilling => "manage_billing",
            Capability::ManageCompanySettings => "manage_company_settings",
            Capability::ViewAuditLog => "view_audit_log",
            Capability::CreateProjects => "create_projects",
            Capability::ManageProjects => "manage_projects",
            Capability::ManageContractors => "manage_contractors",
            Capability::ExportReports => "export_reports",
            Capability::AssignBlockers => "assign_blockers",
            Capability::UploadDrawings => "upload_drawings",
            Capability::ViewReports => "view_reports",
            Capability::CreateBlockers => "create_blockers",
            Capability::ResolveBlockers => "resolve_blockers",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entitlement snapshot handed to UI consumers.
///
/// Derived on demand, never persisted. Consumers read the flags; they must not
/// re-derive them from the role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PermissionSet {
    pub subscription_valid: bool,
    pub subscription_type: Option<SubscriptionType>,
    pub warning: Option<String>,
    pub reason: Option<InvalidReason>,

    pub can_manage_users: bool,
    pub can_manage_billing: bool,
    pub can_manage_company_settings: bool,
    pub can_view_audit_log: bool,
    pub can_create_projects: bool,
    pub can_manage_projects: bool,
    pub can_manage_contractors: bool,
    pub can_export_reports: bool,
    pub can_assign_blockers: bool,
    pub can_upload_drawings: bool,
    pub can_view_reports: bool,
    pub can_create_blockers: bool,
    pub can_resolve_blockers: bool,
}

impl PermissionSet {
    /// Everything denied (no principal).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        *self.flag(capability)
    }

    /// Capabilities currently granted, in [`Capability::ALL`] order.
    pub fn granted(&self) -> Vec<Capability> {
        Capability::ALL.into_iter().filter(|c| self.allows(*c)).collect()
    }

    fn grant(&mut self, capability: Capability) {
        *self.flag_mut(capability) = true;
    }

    fn flag(&self, capability: Capability) -> &bool {
        match capability {
            Capability::ManageUsers => &self.can_manage_users,
            Capability::ManageBilling => &self.can_manage_billing,
            Capability::ManageCompanySettings => &self.can_manage_company_settings,
            Capability::ViewAuditLog => &self.can_view_audit_log,
            Capability::CreateProjects => &self.can_create_projects,
            Capability::ManageProjects => &self.can_manage_projects,
            Capability::ManageContractors => &self.can_manage_contractors,
            Capability::ExportReports => &self.can_export_reports,
            Capability::AssignBlockers => &self.can_assign_blockers,
            Capability::UploadDrawings => &self.can_upload_drawings,
            Capability::ViewReports => &self.can_view_reports,
            Capability::CreateBlockers => &self.can_create_blockers,
            Capability::ResolveBlockers => &self.can_resolve_blockers,
        }
    }

    fn flag_mut(&mut self, capability: Capability) -> &mut bool {
        match capability {
            Capability::ManageUsers => &mut self.can_manage_users,
            Capability::ManageBilling => &mut self.can_manage_billing,
            Capability::ManageCompanySettings => &mut self.can_manage_company_settings,
            Capability::ViewAuditLog => &mut self.can_view_audit_log,
            Capability::CreateProjects => &mut self.can_create_projects,
            Capability::ManageProjects => &mut self.can_manage_projects,
            Capability::ManageContractors => &mut self.can_manage_contractors,
            Capability::ExportReports => &mut self.can_export_reports,
            Capability::AssignBlockers => &mut self.can_assign_blockers,
            Capability::UploadDrawings => &mut self.can_upload_drawings,
            Capability::ViewReports => &mut self.can_view_reports,
            Capability::CreateBlockers => &mut self.can_create_blockers,
            Capability::ResolveBlockers => &mut self.can_resolve_blockers,
        }
    }
}

/// Resolve the permission set of `principal` at `now`.
///
/// The top tier gets every flag regardless of subscription. Everyone else gets
/// `subscription_valid && at_least(role, capability.required_role())`.
pub fn permissions(principal: &Principal, now: DateTime<Utc>) -> PermissionSet {
    let mut set = PermissionSet::none();

    if principal.is_platform_operator() {
        set.subscription_valid = true;
        for capability in Capability::ALL {
            set.grant(capability);
        }
        return set;
    }

    let verdict = subscription::validate(principal.company(), now);
    set.subscription_valid = verdict.valid;
    set.subscription_type = verdict.subscription_type;
    set.warning = verdict.warning;
    set.reason = verdict.reason;

    if !verdict.valid {
        return set;
    }

    let role = principal.role();
    for capability in Capability::ALL {
        if role.at_least(capability.required_role()) {
            set.grant(capability);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sitegate_core::{CompanyId, UserId};

    use crate::identity::Identity;
    use crate::principal::{Company, Profile};
    use crate::subscription::SubscriptionStatus;

    fn principal(role: Role, company: Option<Company>) -> Principal {
        let user = UserId::new();
        let mut profile = Profile::new(user, role, company);
        if profile.company_id.is_none() && !role.is_platform_operator() {
            profile.company_id = Some(CompanyId::new());
        }
        Principal::new(Identity::new(user), profile).unwrap()
    }

    fn company(status: SubscriptionStatus) -> Company {
        Company::new(CompanyId::new(), "Acme Builders", "acme", status)
    }

    #[test]
    fn field_worker_on_active_plan_can_raise_blockers_but_not_manage_users() {
        let p = principal(Role::FieldWorker, Some(company(SubscriptionStatus::Active)));
        let set = permissions(&p, Utc::now());

        assert!(set.subscription_valid);
        assert!(set.can_create_blockers);
        assert!(set.can_resolve_blockers);
        assert!(!set.can_manage_users);
        assert!(!set.can_assign_blockers);
    }

    #[test]
    fn expired_trial_denies_everything_even_for_company_admin() {
        let now = Utc::now();
        let c = company(SubscriptionStatus::Trial).with_trial_ending(now - Duration::days(1));
        let set = permissions(&principal(Role::CompanyAdmin, Some(c)), now);

        assert!(!set.subscription_valid);
        assert_eq!(set.reason, Some(InvalidReason::TrialExpired));
        assert!(set.granted().is_empty());
    }

    #[test]
    fn super_admin_gets_everything_without_a_company() {
        let set = permissions(&principal(Role::SuperAdmin, None), Utc::now());
        assert!(set.subscription_valid);
        assert_eq!(set.granted(), Capability::ALL.to_vec());
    }

    #[test]
    fn company_owner_gets_everything_on_a_valid_plan() {
        let set = permissions(&principal(Role::CompanyOwner, Some(company(SubscriptionStatus::PastDue))), Utc::now());
        assert_eq!(set.granted(), Capability::ALL.to_vec());
        assert_eq!(set.subscription_type, Some(SubscriptionType::PastDue));
        assert!(set.warning.is_some());
    }

    #[test]
    fn unknown_role_gets_nothing() {
        let set = permissions(&principal(Role::Unknown, Some(company(SubscriptionStatus::Active))), Utc::now());
        assert!(set.subscription_valid);
        assert!(set.granted().is_empty());
    }

    #[test]
    fn flags_follow_required_role_table() {
        let now = Utc::now();
        for role in Role::HIERARCHY.into_iter().filter(|r| !r.is_platform_operator()) {
            let set = permissions(&principal(role, Some(company(SubscriptionStatus::Active))), now);
            for capability in Capability::ALL {
                assert_eq!(
                    set.allows(capability),
                    role.at_least(capability.required_role()),
                    "{role} / {capability}"
                );
            }
        }
    }

    #[test]
    fn serializes_flags_for_consumers() {
        let set = permissions(&principal(Role::Supervisor, Some(company(SubscriptionStatus::Active))), Utc::now());
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["can_view_reports"], serde_json::json!(true));
        assert_eq!(value["can_manage_projects"], serde_json::json!(false));
        assert_eq!(value["subscription_type"], serde_json::json!("active"));
    }
}
