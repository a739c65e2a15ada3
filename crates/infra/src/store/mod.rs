//! Persistence seams used by the authorization layer.
//!
//! The layer never writes business data. It reads profiles, project/blocker
//! ownership and scoped rows, and appends audit records. Each concern is a
//! small async trait so the in-memory adapter (tests/dev) and the Postgres
//! adapter are interchangeable.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use sitegate_auth::{Profile, TableQuery};
use sitegate_core::{AuditEventId, BlockerId, CompanyId, ProjectId, UserId};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Ownership facts needed to decide project access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectAccess {
    pub id: ProjectId,
    pub company_id: CompanyId,
    pub team_members: Vec<UserId>,
}

impl ProjectAccess {
    pub fn new(id: ProjectId, company_id: CompanyId) -> Self {
        Self {
            id,
            company_id,
            team_members: Vec::new(),
        }
    }

    pub fn with_member(mut self, user_id: UserId) -> Self {
        self.team_members.push(user_id);
        self
    }
}

/// Ownership facts needed to decide blocker access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockerAccess {
    pub id: BlockerId,
    pub company_id: CompanyId,
    pub project_id: Option<ProjectId>,
}

/// One appended `audit_logs` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: AuditEventId,
    pub company_id: Option<CompanyId>,
    pub user_id: UserId,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub occurred_at: DateTime<Utc>,
}

/// Source of user profiles (with company and plan embedded).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no profile row exists for the user.
    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>, StoreError>;
}

/// Ownership lookups for resource-level checks.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn fetch_project(&self, project_id: ProjectId) -> Result<Option<ProjectAccess>, StoreError>;
    async fn fetch_blocker(&self, blocker_id: BlockerId) -> Result<Option<BlockerAccess>, StoreError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit(&self, record: AuditRecord) -> Result<(), StoreError>;
}

/// Executes conjunctive equality queries over company-owned tables.
///
/// Rows come back as JSON objects keyed by column name. Callers are expected
/// to pass queries that already went through the tenancy filter.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, query: &TableQuery) -> Result<Vec<JsonValue>, StoreError>;
}
