use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use sitegate_auth::{Profile, TableQuery, TenantTable};
use sitegate_core::{BlockerId, ProjectId, UserId};

use super::{
    AuditRecord, AuditSink, BlockerAccess, ProfileStore, ProjectAccess, ResourceStore, RowStore,
    StoreError,
};

/// In-memory store for tests/dev.
///
/// Implements every store trait over plain maps. `set_unavailable(true)` makes
/// every call fail with [`StoreError::Unavailable`], which is how tests drive
/// the fail-closed paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    profiles: RwLock<HashMap<UserId, Profile>>,
    projects: RwLock<HashMap<ProjectId, ProjectAccess>>,
    blockers: RwLock<HashMap<BlockerId, BlockerAccess>>,
    rows: RwLock<HashMap<TenantTable, Vec<JsonValue>>>,
    audit: RwLock<Vec<AuditRecord>>,
    unavailable: RwLock<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_profile(&self, profile: Profile) {
        if let Ok(mut map) = self.profiles.write() {
            map.insert(profile.id, profile);
        }
    }

    pub fn remove_profile(&self, user_id: UserId) {
        if let Ok(mut map) = self.profiles.write() {
            map.remove(&user_id);
        }
    }

    pub fn put_project(&self, project: ProjectAccess) {
        if let Ok(mut map) = self.projects.write() {
            map.insert(project.id, project);
        }
    }

    pub fn put_blocker(&self, blocker: BlockerAccess) {
        if let Ok(mut map) = self.blockers.write() {
            map.insert(blocker.id, blocker);
        }
    }

    /// Add a raw row to a company-owned table.
    pub fn insert_row(&self, table: TenantTable, row: JsonValue) {
        if let Ok(mut map) = self.rows.write() {
            map.entry(table).or_default().push(row);
        }
    }

    /// Audit records appended so far, oldest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        match self.audit.read() {
            Ok(records) => records.clone(),
            Err(_) => vec![],
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.write() {
            *flag = unavailable;
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let down = self.unavailable.read().map(|flag| *flag).unwrap_or(true);
        if down {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lock poisoned"))
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>, StoreError> {
        self.check_available()?;
        let map = self.profiles.read().map_err(|_| poisoned("profiles"))?;
        Ok(map.get(&user_id).cloned())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn fetch_project(&self, project_id: ProjectId) -> Result<Option<ProjectAccess>, StoreError> {
        self.check_available()?;
        let map = self.projects.read().map_err(|_| poisoned("projects"))?;
        Ok(map.get(&project_id).cloned())
    }

    async fn fetch_blocker(&self, blocker_id: BlockerId) -> Result<Option<BlockerAccess>, StoreError> {
        self.check_available()?;
        let map = self.blockers.read().map_err(|_| poisoned("blockers"))?;
        Ok(map.get(&blocker_id).copied())
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn append_audit(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.audit.write().map_err(|_| poisoned("audit"))?;
        records.push(record);
        Ok(())
    }
}

#[async_trait]
impl RowStore for InMemoryStore {
    async fn select(&self, query: &TableQuery) -> Result<Vec<JsonValue>, StoreError> {
        self.check_available()?;
        let map = self.rows.read().map_err(|_| poisoned("rows"))?;
        let rows = map
            .get(&query.table())
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sitegate_auth::Role;
    use sitegate_core::CompanyId;

    #[tokio::test]
    async fn select_applies_filters_per_table() {
        let store = InMemoryStore::new();
        let a = CompanyId::new();
        let b = CompanyId::new();
        store.insert_row(TenantTable::Projects, json!({ "id": 1, "company_id": a }));
        store.insert_row(TenantTable::Projects, json!({ "id": 2, "company_id": b }));
        store.insert_row(TenantTable::Blockers, json!({ "id": 3, "company_id": a }));

        let rows = store
            .select(&TableQuery::new(TenantTable::Projects).eq("company_id", a))
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "id": 1, "company_id": a })]);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store.put_profile(Profile::new(user, Role::SuperAdmin, None));
        store.set_unavailable(true);

        assert!(matches!(store.fetch_profile(user).await, Err(StoreError::Unavailable(_))));
        assert!(store.fetch_project(ProjectId::new()).await.is_err());

        store.set_unavailable(false);
        assert!(store.fetch_profile(user).await.unwrap().is_some());
    }
}
