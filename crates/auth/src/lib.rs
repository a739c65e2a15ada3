//! `sitegate-auth` — pure tenancy & entitlement policy (zero-trust).
//!
//! This crate is intentionally decoupled from IO, storage and transport. Every
//! function here is a deterministic function of its inputs: the session loader
//! and store adapters live in `sitegate-infra`.

pub mod authorize;
pub mod entitlements;
pub mod identity;
pub mod permissions;
pub mod plan;
pub mod principal;
pub mod roles;
pub mod subscription;
pub mod tenancy;

pub use authorize::{Decision, DenialKind, DenialReason, explain};
pub use entitlements::{NOT_IN_PLAN, UsageLimit, feature_access, usage_limit};
pub use identity::{AuthEvent, AuthStateChange, Identity, TokenValidationError, validate_identity};
pub use permissions::{Capability, PermissionSet, permissions};
pub use plan::{FeatureValue, LimitValue, SubscriptionPlan};
pub use principal::{Company, Principal, Profile};
pub use roles::{Role, at_least, rank};
pub use subscription::{
    InvalidReason, PAYMENT_OVERDUE_WARNING, SubscriptionStatus, SubscriptionType, SubscriptionVerdict,
    trial_days_remaining, validate,
};
pub use tenancy::{
    COMPANY_ID_COLUMN, Filter, FilterValue, FilterableQuery, TableQuery, TenancyError, TenantTable, scope_query,
};
