//! Outbound surface consumed by the application.
//!
//! `Gate` ties the session loader to the stores and the clock and exposes the
//! questions the UI and data layer ask: who is signed in, what may they do,
//! which rows may they see.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sitegate_auth::{
    AuthEvent, Capability, Decision, FilterableQuery, PermissionSet, Principal, Profile, TableQuery,
    TenancyError, UsageLimit, explain, feature_access, permissions, scope_query, usage_limit,
};
use sitegate_core::{BlockerId, ProjectId};

use crate::access::{self, AuditEntry};
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::identity::IdentityProvider;
use crate::session::{ListenerId, LoadOutcome, SessionError, SessionLoader};
use crate::store::{AuditSink, InMemoryStore, PostgresStore, ProfileStore, ResourceStore, RowStore, StoreError};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("no signed-in user")]
    NotSignedIn,

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The four store seams a gate reads from and writes to.
#[derive(Clone)]
pub struct Stores {
    pub profiles: Arc<dyn ProfileStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub rows: Arc<dyn RowStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Use one backend for every seam.
    pub fn uniform<S>(store: Arc<S>) -> Self
    where
        S: ProfileStore + ResourceStore + RowStore + AuditSink + 'static,
    {
        Self {
            profiles: store.clone(),
            resources: store.clone(),
            rows: store.clone(),
            audit: store,
        }
    }
}

pub struct Gate {
    session: Arc<SessionLoader>,
    stores: Stores,
    clock: Arc<dyn Clock>,
}

impl Gate {
    pub fn new(identity: Arc<dyn IdentityProvider>, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let session = Arc::new(SessionLoader::new(
            identity,
            Arc::clone(&stores.profiles),
            Arc::clone(&clock),
        ));
        Self {
            session,
            stores,
            clock,
        }
    }

    /// Build a gate from configuration: Postgres when `database_url` is set,
    /// otherwise an empty in-memory store.
    pub async fn connect(config: &GateConfig, identity: Arc<dyn IdentityProvider>) -> Result<Self, GateError> {
        let stores = match &config.database_url {
            Some(url) => {
                let store = PostgresStore::connect(url, config.db_max_connections).await?;
                info!(max_connections = config.db_max_connections, "using postgres store");
                Stores::uniform(Arc::new(store))
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory store");
                Stores::uniform(Arc::new(InMemoryStore::new()))
            }
        };
        Ok(Self::new(identity, stores, Arc::new(SystemClock)))
    }

    /// Load the current session and follow provider events.
    pub async fn initialize(&self) -> Result<JoinHandle<()>, GateError> {
        Ok(self.session.initialize().await?)
    }

    pub fn session(&self) -> &Arc<SessionLoader> {
        &self.session
    }

    pub fn current_user(&self) -> Option<Arc<Principal>> {
        self.session.current()
    }

    pub fn permissions(&self) -> PermissionSet {
        match self.current_user() {
            Some(principal) => permissions(&principal, self.clock.now()),
            None => PermissionSet::none(),
        }
    }

    pub fn explain(&self, capability: Capability) -> Decision {
        let principal = self.current_user();
        explain(principal.as_deref(), capability, self.clock.now())
    }

    pub fn has_feature_access(&self, feature: &str) -> bool {
        self.current_user()
            .is_some_and(|principal| feature_access(&principal, feature))
    }

    pub fn check_usage_limit(&self, limit: &str) -> UsageLimit {
        match self.current_user() {
            Some(principal) => usage_limit(&principal, limit),
            None => UsageLimit::not_in_plan(),
        }
    }

    pub async fn can_access_project(&self, project_id: ProjectId) -> bool {
        let Some(principal) = self.current_user() else {
            return false;
        };
        access::can_access_project(self.stores.resources.as_ref(), &principal, project_id).await
    }

    pub async fn can_access_blocker(&self, blocker_id: BlockerId) -> bool {
        let Some(principal) = self.current_user() else {
            return false;
        };
        access::can_access_blocker(self.stores.resources.as_ref(), &principal, blocker_id).await
    }

    /// Apply the tenancy filter for the current user.
    pub fn scope_query<Q: FilterableQuery>(&self, query: Q) -> Result<Q, GateError> {
        let principal = self.current_user().ok_or(GateError::NotSignedIn)?;
        Ok(scope_query(query, &principal)?)
    }

    /// Scope `query` to the current user and run it.
    pub async fn fetch(&self, query: TableQuery) -> Result<Vec<JsonValue>, GateError> {
        let scoped = self.scope_query(query)?;
        let rows = self.stores.rows.select(&scoped).await.inspect_err(|err| {
            warn!(table = %scoped.table(), error = %err, "scoped fetch failed");
        })?;
        Ok(rows)
    }

    /// Record a business action for the current user. Without a signed-in
    /// user there is no actor, so nothing is written.
    pub async fn log_audit_event(&self, entry: AuditEntry) {
        let Some(principal) = self.current_user() else {
            warn!(action = %entry.action, "audit event without signed-in user dropped");
            return;
        };
        access::log_audit_event(self.stores.audit.as_ref(), &principal, entry, self.clock.now()).await;
    }

    pub async fn reload(&self) -> Result<LoadOutcome, GateError> {
        Ok(self.session.reload().await?)
    }

    pub fn on_auth_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(AuthEvent, Option<&Profile>) + Send + Sync + 'static,
    {
        self.session.on_auth_state_change(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.session.remove_listener(id)
    }
}
