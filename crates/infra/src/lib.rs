//! Infrastructure layer: session loading, store adapters (in-memory and
//! Postgres), resource checks, audit trail and the `Gate` facade.

pub mod access;
pub mod clock;
pub mod config;
pub mod gate;
pub mod identity;
pub mod session;
pub mod store;

pub use access::{AuditEntry, can_access_blocker, can_access_project, log_audit_event};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, GateConfig};
pub use gate::{Gate, GateError, Stores};
pub use identity::{IdentityError, IdentityProvider, InMemoryIdentityProvider};
pub use session::{
    AuthListener, ListenerId, LoadOutcome, SessionError, SessionLoader, SessionSnapshot, SessionStatus,
};
pub use store::{
    AuditRecord, AuditSink, BlockerAccess, InMemoryStore, PostgresStore, ProfileStore, ProjectAccess,
    ResourceStore, RowStore, StoreError,
};
