//! Postgres-backed store.
//!
//! Reads the tenancy tables the authorization layer depends on and appends to
//! `audit_logs`. Expected schema (columns actually read):
//!
//! | Table | Columns |
//! |-------|---------|
//! | `user_profiles` | `id`, `role`, `company_id`, `email`, `full_name` |
//! | `companies` | `id`, `name`, `slug`, `subscription_status`, `trial_ends_at`, `is_active`, `is_suspended`, `subscription_plan_id` |
//! | `subscription_plans` | `id`, `name`, `features` (jsonb), `limits` (jsonb) |
//! | `projects` | `id`, `company_id` |
//! | `project_team_members` | `project_id`, `user_id` |
//! | `blockers` | `id`, `company_id`, `project_id` |
//! | `audit_logs` | `id`, `company_id`, `user_id`, `action`, `resource_type`, `resource_id`, `old_values`, `new_values`, `created_at` |
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database, integrity codes (`23xxx`) | `InvalidQuery` |
//! | Database, undefined column/table (`42703`, `42P01`) | `InvalidQuery` |
//! | Database (other) | `Unavailable` |
//! | ColumnDecode / Decode / ColumnNotFound | `Malformed` |
//! | PoolClosed / PoolTimedOut / Io / Tls / other | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;
use uuid::Uuid;

use sitegate_auth::{
    Company, FilterValue, Profile, Role, SubscriptionPlan, SubscriptionStatus, TableQuery,
};
use sitegate_core::{BlockerId, CompanyId, ProjectId, UserId};

use super::{
    AuditRecord, AuditSink, BlockerAccess, ProfileStore, ProjectAccess, ResourceStore, RowStore,
    StoreError,
};

/// Postgres-backed implementation of every store trait.
///
/// `Send + Sync`; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ProfileStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                p.id,
                p.role,
                p.company_id,
                p.email,
                p.full_name,
                c.id AS c_id,
                c.name AS c_name,
                c.slug AS c_slug,
                c.subscription_status AS c_subscription_status,
                c.trial_ends_at AS c_trial_ends_at,
                c.is_active AS c_is_active,
                c.is_suspended AS c_is_suspended,
                sp.name AS plan_name,
                sp.features AS plan_features,
                sp.limits AS plan_limits
            FROM user_profiles p
            LEFT JOIN companies c ON c.id = p.company_id
            LEFT JOIN subscription_plans sp ON sp.id = c.subscription_plan_id
            WHERE p.id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_profile", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decoded = ProfileRow::decode(&row).map_err(|e| map_sqlx_error("fetch_profile", e))?;
        decoded.into_profile().map(Some)
    }
}

#[async_trait]
impl ResourceStore for PostgresStore {
    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn fetch_project(&self, project_id: ProjectId) -> Result<Option<ProjectAccess>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                p.id,
                p.company_id,
                COALESCE(
                    array_agg(m.user_id) FILTER (WHERE m.user_id IS NOT NULL),
                    '{}'
                ) AS team_members
            FROM projects p
            LEFT JOIN project_team_members m ON m.project_id = p.id
            WHERE p.id = $1
            GROUP BY p.id, p.company_id
            "#,
        )
        .bind(project_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_project", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let members: Vec<Uuid> = row
            .try_get("team_members")
            .map_err(|e| map_sqlx_error("fetch_project", e))?;
        let company_id: Uuid = row
            .try_get("company_id")
            .map_err(|e| map_sqlx_error("fetch_project", e))?;

        Ok(Some(ProjectAccess {
            id: project_id,
            company_id: CompanyId::from_uuid(company_id),
            team_members: members.into_iter().map(UserId::from_uuid).collect(),
        }))
    }

    #[instrument(skip(self), fields(blocker_id = %blocker_id), err)]
    async fn fetch_blocker(&self, blocker_id: BlockerId) -> Result<Option<BlockerAccess>, StoreError> {
        let row = sqlx::query("SELECT id, company_id, project_id FROM blockers WHERE id = $1")
            .bind(blocker_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_blocker", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let company_id: Uuid = row
            .try_get("company_id")
            .map_err(|e| map_sqlx_error("fetch_blocker", e))?;
        let project_id: Option<Uuid> = row
            .try_get("project_id")
            .map_err(|e| map_sqlx_error("fetch_blocker", e))?;

        Ok(Some(BlockerAccess {
            id: blocker_id,
            company_id: CompanyId::from_uuid(company_id),
            project_id: project_id.map(ProjectId::from_uuid),
        }))
    }
}

#[async_trait]
impl AuditSink for PostgresStore {
    #[instrument(
        skip(self, record),
        fields(action = %record.action, resource_type = %record.resource_type, user_id = %record.user_id),
        err
    )]
    async fn append_audit(&self, record: AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, company_id, user_id, action, resource_type, resource_id,
                old_values, new_values, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.company_id.map(Uuid::from))
        .bind(record.user_id.as_uuid())
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(record.occurred_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }
}

#[async_trait]
impl RowStore for PostgresStore {
    #[instrument(skip(self, query), fields(table = %query.table(), filters = query.filters().len()), err)]
    async fn select(&self, query: &TableQuery) -> Result<Vec<JsonValue>, StoreError> {
        let mut builder = build_select(query)?;
        let rows = builder
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select", e))?;

        rows.iter()
            .map(|row| row.try_get::<JsonValue, _>("row"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("select", e))
    }
}

/// Render `query` as `SELECT to_jsonb(t) AS row FROM <table> t WHERE ...`.
///
/// Table names come from a closed enum; column names are validated as plain
/// identifiers before being spliced in. Values are always bound.
fn build_select(query: &TableQuery) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT to_jsonb(t) AS row FROM ");
    builder.push(query.table().as_str());
    builder.push(" t");

    for (i, filter) in query.filters().iter().enumerate() {
        if !is_identifier(&filter.column) {
            return Err(StoreError::InvalidQuery(format!(
                "'{}' is not a valid column name",
                filter.column
            )));
        }
        builder.push(if i == 0 { " WHERE t." } else { " AND t." });
        builder.push(&filter.column);
        builder.push(" = ");
        match &filter.value {
            FilterValue::Uuid(v) => builder.push_bind(*v),
            FilterValue::Bool(v) => builder.push_bind(*v),
            FilterValue::Int(v) => builder.push_bind(*v),
            FilterValue::Text(v) => builder.push_bind(v.clone()),
        };
    }
    Ok(builder)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some(code) if code.starts_with("23") => StoreError::InvalidQuery(msg),
                Some("42703") | Some("42P01") => StoreError::InvalidQuery(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Malformed(format!("failed to decode row in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLx row types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ProfileRow {
    id: Uuid,
    role: String,
    company_id: Option<Uuid>,
    email: Option<String>,
    full_name: Option<String>,
    company: Option<CompanyRow>,
}

#[derive(Debug)]
struct CompanyRow {
    id: Uuid,
    name: String,
    slug: String,
    subscription_status: String,
    trial_ends_at: Option<DateTime<Utc>>,
    is_active: Option<bool>,
    is_suspended: Option<bool>,
    plan: Option<PlanRow>,
}

#[derive(Debug)]
struct PlanRow {
    name: String,
    features: Option<JsonValue>,
    limits: Option<JsonValue>,
}

impl ProfileRow {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        let company = match row.try_get::<Option<Uuid>, _>("c_id")? {
            Some(id) => {
                let plan = match row.try_get::<Option<String>, _>("plan_name")? {
                    Some(name) => Some(PlanRow {
                        name,
                        features: row.try_get("plan_features")?,
                        limits: row.try_get("plan_limits")?,
                    }),
                    None => None,
                };
                Some(CompanyRow {
                    id,
                    name: row.try_get("c_name")?,
                    slug: row.try_get("c_slug")?,
                    subscription_status: row.try_get("c_subscription_status")?,
                    trial_ends_at: row.try_get("c_trial_ends_at")?,
                    is_active: row.try_get("c_is_active")?,
                    is_suspended: row.try_get("c_is_suspended")?,
                    plan,
                })
            }
            None => None,
        };

        Ok(ProfileRow {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            company_id: row.try_get("company_id")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            company,
        })
    }

    fn into_profile(self) -> Result<Profile, StoreError> {
        let company = self.company.map(CompanyRow::into_company).transpose()?;
        Ok(Profile {
            id: UserId::from_uuid(self.id),
            role: Role::from(self.role),
            company_id: self.company_id.map(CompanyId::from_uuid),
            email: self.email,
            full_name: self.full_name,
            company,
        })
    }
}

impl CompanyRow {
    fn into_company(self) -> Result<Company, StoreError> {
        let subscription_plan = self.plan.map(PlanRow::into_plan).transpose()?;
        Ok(Company {
            id: CompanyId::from_uuid(self.id),
            name: self.name,
            slug: self.slug,
            subscription_status: SubscriptionStatus::from(self.subscription_status),
            trial_ends_at: self.trial_ends_at,
            is_active: self.is_active.unwrap_or(false),
            is_suspended: self.is_suspended.unwrap_or(false),
            subscription_plan,
        })
    }
}

impl PlanRow {
    fn into_plan(self) -> Result<SubscriptionPlan, StoreError> {
        let features = match self.features {
            Some(JsonValue::Null) | None => Default::default(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                StoreError::Malformed(format!("plan '{}' features: {}", self.name, e))
            })?,
        };
        let limits = match self.limits {
            Some(JsonValue::Null) | None => Default::default(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                StoreError::Malformed(format!("plan '{}' limits: {}", self.name, e))
            })?,
        };
        Ok(SubscriptionPlan {
            name: self.name,
            features,
            limits,
        })
    }
}
