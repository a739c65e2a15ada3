//! Tenancy filter contract.
//!
//! Every list/detail query against a company-owned table goes through
//! [`scope_query`]. For anyone below the top tier the query is constrained to
//! the principal's own company; a principal without a company id is a
//! configuration error, never an unscoped query.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use sitegate_core::{BlockerId, CompanyId, ProjectId, UserId};

use crate::principal::Principal;
use crate::roles::Role;

/// Tenant column carried by every company-owned table.
pub const COMPANY_ID_COLUMN: &str = "company_id";

/// Company-owned tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantTable {
    UserProfiles,
    Projects,
    Blockers,
    Contractors,
    Drawings,
    AuditLogs,
}

impl TenantTable {
    pub const ALL: [TenantTable; 6] = [
        TenantTable::UserProfiles,
        TenantTable::Projects,
        TenantTable::Blockers,
        TenantTable::Contractors,
        TenantTable::Drawings,
        TenantTable::AuditLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantTable::UserProfiles => "user_profiles",
            TenantTable::Projects => "projects",
            TenantTable::Blockers => "blockers",
            TenantTable::Contractors => "contractors",
            TenantTable::Drawings => "drawings",
            TenantTable::AuditLogs => "audit_logs",
        }
    }
}

impl core::fmt::Display for TenantTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of an equality filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Uuid(Uuid),
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FilterValue {
    /// Whether a JSON cell equals this value.
    pub fn matches(&self, cell: &JsonValue) -> bool {
        match (self, cell) {
            (FilterValue::Uuid(expected), JsonValue::String(s)) => {
                Uuid::parse_str(s).is_ok_and(|actual| actual == *expected)
            }
            (FilterValue::Bool(expected), JsonValue::Bool(actual)) => expected == actual,
            (FilterValue::Int(expected), JsonValue::Number(n)) => n.as_i64() == Some(*expected),
            (FilterValue::Text(expected), JsonValue::String(actual)) => expected == actual,
            _ => false,
        }
    }
}

macro_rules! filter_value_from_id {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FilterValue {
                fn from(value: $t) -> Self {
                    FilterValue::Uuid(value.into())
                }
            }
        )*
    };
}

filter_value_from_id!(CompanyId, UserId, ProjectId, BlockerId, Uuid);

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

/// A query that can be narrowed with an equality filter on a named column.
///
/// This is the only capability the tenancy filter needs from a query builder.
pub trait FilterableQuery: Sized {
    fn filter_eq(self, column: &str, value: FilterValue) -> Self;
}

/// One `column = value` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: FilterValue,
}

/// A conjunctive equality query over one company-owned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQuery {
    table: TenantTable,
    filters: Vec<Filter>,
}

impl TableQuery {
    pub fn new(table: TenantTable) -> Self {
        Self {
            table,
            filters: Vec::new(),
        }
    }

    pub fn eq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter_eq(column, value.into())
    }

    pub fn table(&self) -> TenantTable {
        self.table
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Whether a row satisfies every filter. Rows missing a filtered column never match.
    pub fn matches(&self, row: &JsonValue) -> bool {
        self.filters
            .iter()
            .all(|f| row.get(&f.column).is_some_and(|cell| f.value.matches(cell)))
    }

    /// Whether the query carries `company_id = company`.
    pub fn is_scoped_to(&self, company: CompanyId) -> bool {
        let expected = FilterValue::from(company);
        self.filters
            .iter()
            .any(|f| f.column == COMPANY_ID_COLUMN && f.value == expected)
    }
}

impl FilterableQuery for TableQuery {
    fn filter_eq(mut self, column: &str, value: FilterValue) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            value,
        });
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenancyError {
    #[error("principal {user_id} with role '{role}' has no company; refusing to issue an unscoped query")]
    MissingCompany { user_id: UserId, role: Role },
}

/// Constrain `query` to the rows `principal` may see.
///
/// Top tier: the query is returned unchanged. Everyone else: `company_id` must
/// equal the principal's company.
pub fn scope_query<Q: FilterableQuery>(query: Q, principal: &Principal) -> Result<Q, TenancyError> {
    if principal.is_platform_operator() {
        tracing::trace!(user_id = %principal.id(), "tenancy filter bypassed for platform operator");
        return Ok(query);
    }

    let company_id = principal.company_id().ok_or(TenancyError::MissingCompany {
        user_id: principal.id(),
        role: principal.role(),
    })?;

    Ok(query.filter_eq(COMPANY_ID_COLUMN, FilterValue::from(company_id)))
}
