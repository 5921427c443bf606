//! Routing data source: the public entry point of the router.
//!
//! Answers connection requests by combining the [`Router`], the
//! [`TransactionCoordinator`] and [`ConnectionLease`]s:
//!
//! - outside a transaction, the routed provider's connection is returned as-is;
//! - inside one, the lease held for `(transaction id, routing key)` is returned,
//!   opening and holding a new one on first use.

use crate::context::{ContextSource, TaskContext};
use crate::db::connection::{Connection, ConnectionProvider};
use crate::db::lease::ConnectionLease;
use crate::db::registry::{Registration, Registry};
use crate::db::router::{KeyPicker, MissingHandler, Router};
use crate::db::transaction_registry::{TransactionCoordinator, TransactionRegistry};
use crate::error::DbResult;
use crate::models::DatabaseType;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection handed out by [`RoutingDataSource`].
pub enum RoutedConnection {
    /// Plain provider connection, no interception.
    Direct(Box<dyn Connection>),
    /// Shared lease of the current transaction scope.
    Leased(Arc<ConnectionLease>),
}

impl RoutedConnection {
    pub fn lease(&self) -> Option<&Arc<ConnectionLease>> {
        match self {
            Self::Direct(_) => None,
            Self::Leased(lease) => Some(lease),
        }
    }

    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Leased(_))
    }
}

#[async_trait]
impl Connection for RoutedConnection {
    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        match self {
            Self::Direct(conn) => conn.execute(sql).await,
            Self::Leased(lease) => lease.execute(sql).await,
        }
    }

    async fn commit(&mut self) -> DbResult<()> {
        match self {
            Self::Direct(conn) => conn.commit().await,
            Self::Leased(lease) => lease.commit().await,
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        match self {
            Self::Direct(conn) => conn.rollback().await,
            Self::Leased(lease) => lease.rollback().await,
        }
    }

    async fn close(&mut self) -> DbResult<()> {
        match self {
            Self::Direct(conn) => conn.close().await,
            Self::Leased(lease) => lease.close().await,
        }
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        match self {
            Self::Direct(conn) => conn.set_auto_commit(auto_commit).await,
            Self::Leased(lease) => lease.set_auto_commit(auto_commit).await,
        }
    }

    async fn auto_commit(&self) -> DbResult<bool> {
        match self {
            Self::Direct(conn) => conn.auto_commit().await,
            Self::Leased(lease) => lease.auto_commit().await,
        }
    }

    async fn is_closed(&self) -> bool {
        match self {
            Self::Direct(conn) => conn.is_closed().await,
            Self::Leased(lease) => lease.is_closed().await,
        }
    }

    fn database_type(&self) -> DatabaseType {
        match self {
            Self::Direct(conn) => conn.database_type(),
            Self::Leased(lease) => lease.database_type(),
        }
    }
}

impl std::fmt::Debug for RoutedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(conn) => f
                .debug_tuple("Direct")
                .field(&conn.database_type())
                .finish(),
            Self::Leased(lease) => f.debug_tuple("Leased").field(lease).finish(),
        }
    }
}

/// Builder for [`RoutingDataSource`].
pub struct RoutingDataSourceBuilder {
    registry: Arc<Registry>,
    missing_handler: Option<Arc<dyn MissingHandler>>,
    picker: Option<Arc<dyn KeyPicker>>,
    coordinator: Option<Arc<dyn TransactionCoordinator>>,
    context: Option<Arc<dyn ContextSource>>,
}

impl RoutingDataSourceBuilder {
    pub fn missing_handler(mut self, handler: Arc<dyn MissingHandler>) -> Self {
        self.missing_handler = Some(handler);
        self
    }

    pub fn picker(mut self, picker: Arc<dyn KeyPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn coordinator(mut self, coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Source of the routing key and transaction id. Defaults to [`TaskContext`].
    pub fn context(mut self, context: Arc<dyn ContextSource>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> RoutingDataSource {
        let mut router = Router::new(Arc::clone(&self.registry));
        if let Some(handler) = self.missing_handler {
            router = router.with_missing_handler(handler);
        }
        if let Some(picker) = self.picker {
            router = router.with_picker(picker);
        }

        RoutingDataSource {
            registry: self.registry,
            router,
            coordinator: self
                .coordinator
                .unwrap_or_else(|| Arc::new(TransactionRegistry::new())),
            context: self.context.unwrap_or_else(|| Arc::new(TaskContext)),
        }
    }
}

pub struct RoutingDataSource {
    registry: Arc<Registry>,
    router: Router,
    coordinator: Arc<dyn TransactionCoordinator>,
    context: Arc<dyn ContextSource>,
}

impl RoutingDataSource {
    /// Data source reading the task-local context, with an in-memory coordinator.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: Arc<Registry>) -> RoutingDataSourceBuilder {
        RoutingDataSourceBuilder {
            registry,
            missing_handler: None,
            picker: None,
            coordinator: None,
            context: None,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn coordinator(&self) -> &Arc<dyn TransactionCoordinator> {
        &self.coordinator
    }

    pub fn add(
        &self,
        key: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
        options: Registration,
    ) -> DbResult<()> {
        self.registry.add(key, provider, options)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn ConnectionProvider>> {
        self.registry.remove(key)
    }

    pub fn set_default(&self, key: &str) -> DbResult<()> {
        self.registry.set_default(key)
    }

    pub fn default_key(&self) -> String {
        self.registry.default_key()
    }

    pub fn default_provider(&self) -> Arc<dyn ConnectionProvider> {
        self.registry.default_provider()
    }

    pub fn default_dialect(&self) -> DatabaseType {
        self.registry.default_dialect()
    }

    pub fn dialect_of(&self, key: &str) -> Option<DatabaseType> {
        self.registry.dialect_of(key)
    }

    pub fn default_url(&self) -> Option<String> {
        self.registry.default_url()
    }

    /// Get a connection for the current routing key and transaction.
    pub async fn get_connection(&self) -> DbResult<RoutedConnection> {
        self.connect(None).await
    }

    /// Like [`RoutingDataSource::get_connection`], acquiring as `user`.
    pub async fn get_connection_with(
        &self,
        user: &str,
        password: &str,
    ) -> DbResult<RoutedConnection> {
        self.connect(Some((user, password))).await
    }

    async fn connect(&self, credentials: Option<(&str, &str)>) -> DbResult<RoutedConnection> {
        let Some(xid) = self.context.transaction_id() else {
            let provider = self.router.route(&*self.context)?;
            let connection = acquire(&provider, credentials).await?;
            return Ok(RoutedConnection::Direct(connection));
        };

        let key = self
            .context
            .routing_key()
            .unwrap_or_else(|| self.registry.default_key());

        if let Some(lease) = self.coordinator.held(&xid, &key) {
            debug!(transaction_id = %xid, routing_key = %key, lease_id = %lease.id(), "Reusing lease");
            return Ok(RoutedConnection::Leased(lease));
        }

        let provider = self.router.route(&*self.context)?;
        let connection = acquire(&provider, credentials).await?;
        let lease = Arc::new(
            ConnectionLease::open(
                connection,
                xid.as_str(),
                key.as_str(),
                Arc::clone(&self.context),
                &self.coordinator,
            )
            .await,
        );

        // Re-check after async work: another caller may have held a lease meanwhile.
        let held = self.coordinator.hold(&xid, &key, Arc::clone(&lease));
        if held.id() != lease.id() {
            if let Err(e) = lease.discard().await {
                warn!(lease_id = %lease.id(), error = %e, "Failed to close duplicate lease");
            }
        }
        Ok(RoutedConnection::Leased(held))
    }

    /// `self` if `T` is this type, otherwise whatever the routed provider unwraps to.
    pub fn unwrap<T: Any + Send + Sync>(self: &Arc<Self>) -> DbResult<Option<Arc<T>>> {
        if TypeId::of::<T>() == TypeId::of::<Self>() {
            let any: Arc<dyn Any + Send + Sync> = Arc::<Self>::clone(self);
            return Ok(any.downcast::<T>().ok());
        }
        let provider = self.router.route(&*self.context)?;
        Ok(provider
            .unwrap_any(TypeId::of::<T>())
            .and_then(|any| any.downcast::<T>().ok()))
    }

    pub fn is_wrapper_for<T: Any>(&self) -> DbResult<bool> {
        if TypeId::of::<T>() == TypeId::of::<Self>() {
            return Ok(true);
        }
        let provider = self.router.route(&*self.context)?;
        Ok(provider.unwrap_any(TypeId::of::<T>()).is_some())
    }
}

impl std::fmt::Debug for RoutingDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDataSource")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

async fn acquire(
    provider: &Arc<dyn ConnectionProvider>,
    credentials: Option<(&str, &str)>,
) -> DbResult<Box<dyn Connection>> {
    match credentials {
        Some((user, password)) => provider.acquire_with(user, password).await,
        None => provider.acquire().await,
    }
}
