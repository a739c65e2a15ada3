//! Resource-level access checks and the audit trail.
//!
//! Everything here fails closed: a lookup error or a missing row is a denial,
//! logged and never propagated. Audit writes are best effort and never fail
//! the business action that triggered them.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use sitegate_auth::{Principal, Role};
use sitegate_core::{AuditEventId, BlockerId, ProjectId};

use crate::store::{AuditRecord, AuditSink, ResourceStore};

/// May `principal` open project `project_id`?
///
/// Top tier: yes. Otherwise the project must belong to the principal's
/// company, and the principal must be an admin (or above) there or a member
/// of the project team.
pub async fn can_access_project(
    resources: &dyn ResourceStore,
    principal: &Principal,
    project_id: ProjectId,
) -> bool {
    if principal.is_platform_operator() {
        return true;
    }

    let project = match resources.fetch_project(project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => {
            debug!(%project_id, user_id = %principal.id(), "project not found; denying");
            return false;
        }
        Err(err) => {
            warn!(%project_id, user_id = %principal.id(), error = %err, "project lookup failed; denying");
            return false;
        }
    };

    if principal.company_id() != Some(project.company_id) {
        warn!(
            %project_id,
            user_id = %principal.id(),
            project_company = %project.company_id,
            "cross-tenant project access denied"
        );
        return false;
    }

    if principal.role().at_least(Role::CompanyAdmin) {
        return true;
    }

    project.team_members.contains(&principal.id())
}

/// May `principal` open blocker `blocker_id`?
///
/// Same company required. A blocker attached to a project inherits that
/// project's access rule; an unattached one is open to the whole company.
pub async fn can_access_blocker(
    resources: &dyn ResourceStore,
    principal: &Principal,
    blocker_id: BlockerId,
) -> bool {
    if principal.is_platform_operator() {
        return true;
    }

    let blocker = match resources.fetch_blocker(blocker_id).await {
        Ok(Some(blocker)) => blocker,
        Ok(None) => {
            debug!(%blocker_id, user_id = %principal.id(), "blocker not found; denying");
            return false;
        }
        Err(err) => {
            warn!(%blocker_id, user_id = %principal.id(), error = %err, "blocker lookup failed; denying");
            return false;
        }
    };

    if principal.company_id() != Some(blocker.company_id) {
        warn!(
            %blocker_id,
            user_id = %principal.id(),
            blocker_company = %blocker.company_id,
            "cross-tenant blocker access denied"
        );
        return false;
    }

    match blocker.project_id {
        Some(project_id) => can_access_project(resources, principal, project_id).await,
        None => true,
    }
}

/// A business action to record in the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl ToString,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
            old_values: None,
            new_values: None,
        }
    }

    pub fn with_old_values(mut self, values: JsonValue) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_new_values(mut self, values: JsonValue) -> Self {
        self.new_values = Some(values);
        self
    }

    fn into_record(self, principal: &Principal, occurred_at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: AuditEventId::new(),
            company_id: principal.company_id(),
            user_id: principal.id(),
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            old_values: self.old_values,
            new_values: self.new_values,
            occurred_at,
        }
    }
}

/// Append `entry` on behalf of `principal`. Failures are logged and swallowed.
pub async fn log_audit_event(
    sink: &dyn AuditSink,
    principal: &Principal,
    entry: AuditEntry,
    occurred_at: DateTime<Utc>,
) {
    let record = entry.into_record(principal, occurred_at);
    let (action, resource_type, resource_id) = (
        record.action.clone(),
        record.resource_type.clone(),
        record.resource_id.clone(),
    );

    if let Err(err) = sink.append_audit(record).await {
        warn!(
            user_id = %principal.id(),
            %action,
            %resource_type,
            %resource_id,
            error = %err,
            "audit write failed; continuing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sitegate_auth::{Company, Identity, Profile, SubscriptionStatus};
    use sitegate_core::{CompanyId, UserId};

    use crate::store::{BlockerAccess, InMemoryStore, ProjectAccess};

    fn principal(role: Role, company_id: Option<CompanyId>) -> Principal {
        let user = UserId::new();
        let company = company_id.map(|id| Company::new(id, "Acme", "acme", SubscriptionStatus::Active));
        Principal::new(Identity::new(user), Profile::new(user, role, company)).unwrap()
    }

    #[tokio::test]
    async fn team_membership_gates_non_admins() {
        let store = InMemoryStore::new();
        let company = CompanyId::new();
        let member = principal(Role::FieldWorker, Some(company));
        let outsider = principal(Role::ProjectManager, Some(company));
        let admin = principal(Role::CompanyAdmin, Some(company));
        let project = ProjectAccess::new(ProjectId::new(), company).with_member(member.id());
        let project_id = project.id;
        store.put_project(project);

        assert!(can_access_project(&store, &member, project_id).await);
        assert!(!can_access_project(&store, &outsider, project_id).await);
        assert!(can_access_project(&store, &admin, project_id).await);
    }

    #[tokio::test]
    async fn other_company_is_denied_even_for_owner() {
        let store = InMemoryStore::new();
        let project = ProjectAccess::new(ProjectId::new(), CompanyId::new());
        let project_id = project.id;
        store.put_project(project);

        let owner = principal(Role::CompanyOwner, Some(CompanyId::new()));
        assert!(!can_access_project(&store, &owner, project_id).await);

        let operator = principal(Role::SuperAdmin, None);
        assert!(can_access_project(&store, &operator, project_id).await);
    }

    #[tokio::test]
    async fn lookup_failure_denies() {
        let store = InMemoryStore::new();
        let company = CompanyId::new();
        let project = ProjectAccess::new(ProjectId::new(), company);
        let project_id = project.id;
        store.put_project(project);
        store.set_unavailable(true);

        let admin = principal(Role::CompanyAdmin, Some(company));
        assert!(!can_access_project(&store, &admin, project_id).await);
        assert!(!can_access_project(&InMemoryStore::new(), &admin, ProjectId::new()).await);
    }

    #[tokio::test]
    async fn blocker_inherits_project_rule() {
        let store = InMemoryStore::new();
        let company = CompanyId::new();
        let worker = principal(Role::FieldWorker, Some(company));
        let project = ProjectAccess::new(ProjectId::new(), company);
        let project_id = project.id;
        store.put_project(project);

        let attached = BlockerAccess {
            id: BlockerId::new(),
            company_id: company,
            project_id: Some(project_id),
        };
        let loose = BlockerAccess {
            id: BlockerId::new(),
            company_id: company,
            project_id: None,
        };
        let foreign = BlockerAccess {
            id: BlockerId::new(),
            company_id: CompanyId::new(),
            project_id: None,
        };
        for blocker in [attached, loose, foreign] {
            store.put_blocker(blocker);
        }

        assert!(!can_access_blocker(&store, &worker, attached.id).await);
        assert!(can_access_blocker(&store, &worker, loose.id).await);
        assert!(!can_access_blocker(&store, &worker, foreign.id).await);
    }

    #[tokio::test]
    async fn audit_records_actor_and_company() {
        let store = InMemoryStore::new();
        let company = CompanyId::new();
        let actor = principal(Role::ProjectManager, Some(company));
        let blocker = BlockerId::new();
        let now = Utc::now();

        log_audit_event(
            &store,
            &actor,
            AuditEntry::new("blocker.resolved", "blocker", blocker)
                .with_old_values(json!({ "status": "open" }))
                .with_new_values(json!({ "status": "resolved" })),
            now,
        )
        .await;

        let records = store.audit_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, actor.id());
        assert_eq!(records[0].company_id, Some(company));
        assert_eq!(records[0].resource_id, blocker.to_string());
        assert_eq!(records[0].occurred_at, now);
    }

    #[tokio::test]
    async fn audit_failure_is_swallowed() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let actor = principal(Role::CompanyAdmin, Some(CompanyId::new()));

        log_audit_event(&store, &actor, AuditEntry::new("user.invited", "user", "u-1"), Utc::now()).await;
        store.set_unavailable(false);
        assert!(store.audit_records().is_empty());
    }
}
