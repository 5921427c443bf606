//! Transaction-scoped connection leases.
//!
//! A [`ConnectionLease`] wraps one real connection and binds it to the
//! transaction id that was current when it was opened. While that id is still
//! the current one, the lifecycle calls (`commit`, `rollback`, `close`,
//! `set_auto_commit`) are swallowed so that every participant of the scope can
//! share the connection without ending it. Once the scope has moved on they
//! reach the real connection; `close` then restores autocommit, performs the
//! real close exactly once and untracks the lease.
//!
//! State per lease: `Leased -> Released` (terminal).

use crate::context::ContextSource;
use crate::db::connection::Connection;
use crate::db::transaction_registry::TransactionCoordinator;
use crate::error::DbResult;
use crate::models::DatabaseType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Connection method tag used to decide interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCall {
    Commit,
    Rollback,
    Close,
    SetAutoCommit,
    Other,
}

impl LifecycleCall {
    /// Whether an in-scope lease swallows this call.
    pub fn is_intercepted(self) -> bool {
        !matches!(self, Self::Other)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Close => "close",
            Self::SetAutoCommit => "set_auto_commit",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Leased,
    Released,
}

pub struct ConnectionLease {
    id: String,
    transaction_id: String,
    routing_key: String,
    dialect: DatabaseType,
    connection: Mutex<Box<dyn Connection>>,
    released: AtomicBool,
    context: Arc<dyn ContextSource>,
    coordinator: Weak<dyn TransactionCoordinator>,
}

impl ConnectionLease {
    /// Wrap `connection` for `(xid, key)`, switching autocommit off.
    ///
    /// Failing to switch autocommit off is logged and otherwise ignored.
    pub async fn open(
        mut connection: Box<dyn Connection>,
        xid: impl Into<String>,
        key: impl Into<String>,
        context: Arc<dyn ContextSource>,
        coordinator: &Arc<dyn TransactionCoordinator>,
    ) -> Self {
        let id = generate_lease_id();
        if let Err(e) = connection.set_auto_commit(false).await {
            debug!(lease_id = %id, error = %e, "Error setting autocommit to false");
        }

        let lease = Self {
            id,
            transaction_id: xid.into(),
            routing_key: key.into(),
            dialect: connection.database_type(),
            connection: Mutex::new(connection),
            released: AtomicBool::new(false),
            context,
            coordinator: Arc::downgrade(coordinator),
        };

        info!(
            lease_id = %lease.id,
            transaction_id = %lease.transaction_id,
            routing_key = %lease.routing_key,
            "Connection leased"
        );
        lease
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn database_type(&self) -> DatabaseType {
        self.dialect
    }

    pub fn state(&self) -> LeaseState {
        if self.released.load(Ordering::Acquire) {
            LeaseState::Released
        } else {
            LeaseState::Leased
        }
    }

    /// Whether the lease's transaction is still the current one.
    pub fn is_in_scope(&self) -> bool {
        self.context.transaction_id().as_deref() == Some(self.transaction_id.as_str())
    }

    /// Whether `call` is swallowed right now.
    pub fn intercepts(&self, call: LifecycleCall) -> bool {
        if call.is_intercepted() && self.is_in_scope() {
            debug!(
                lease_id = %self.id,
                transaction_id = %self.transaction_id,
                call = call.name(),
                "Lifecycle call suppressed inside transaction scope"
            );
            true
        } else {
            false
        }
    }

    pub async fn execute(&self, sql: &str) -> DbResult<u64> {
        self.connection.lock().await.execute(sql).await
    }

    pub async fn commit(&self) -> DbResult<()> {
        if self.intercepts(LifecycleCall::Commit) {
            return Ok(());
        }
        self.connection.lock().await.commit().await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        if self.intercepts(LifecycleCall::Rollback) {
            return Ok(());
        }
        self.connection.lock().await.rollback().await
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> DbResult<()> {
        if self.intercepts(LifecycleCall::SetAutoCommit) {
            return Ok(());
        }
        self.connection
            .lock()
            .await
            .set_auto_commit(auto_commit)
            .await
    }

    pub async fn auto_commit(&self) -> DbResult<bool> {
        self.connection.lock().await.auto_commit().await
    }

    pub async fn is_closed(&self) -> bool {
        if self.state() == LeaseState::Released {
            return true;
        }
        self.connection.lock().await.is_closed().await
    }

    /// Close the lease.
    ///
    /// Inside the scope this does nothing. Afterwards it restores autocommit,
    /// closes the real connection once and untracks the lease.
    pub async fn close(&self) -> DbResult<()> {
        if self.intercepts(LifecycleCall::Close) {
            return Ok(());
        }
        if !self.close_connection().await? {
            return Ok(());
        }

        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.release(self);
        }
        info!(
            lease_id = %self.id,
            transaction_id = %self.transaction_id,
            routing_key = %self.routing_key,
            "Connection lease released"
        );
        Ok(())
    }

    /// Close the real connection of a lease that lost the race to be held.
    pub(crate) async fn discard(&self) -> DbResult<()> {
        if self.close_connection().await? {
            debug!(lease_id = %self.id, "Duplicate lease discarded");
        }
        Ok(())
    }

    /// Restore autocommit and close. Returns `false` if already released.
    async fn close_connection(&self) -> DbResult<bool> {
        let mut connection = self.connection.lock().await;
        if self.released.load(Ordering::Acquire) {
            return Ok(false);
        }

        match connection.auto_commit().await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = connection.set_auto_commit(true).await {
                    debug!(
                        lease_id = %self.id,
                        error = %e,
                        "Error resetting autocommit to true before closing the connection"
                    );
                }
            }
            Err(e) => {
                debug!(lease_id = %self.id, error = %e, "Error reading autocommit before close");
            }
        }

        connection.close().await?;
        self.released.store(true, Ordering::Release);
        Ok(true)
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("id", &self.id)
            .field("transaction_id", &self.transaction_id)
            .field("routing_key", &self.routing_key)
            .field("dialect", &self.dialect)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Generate a unique lease ID.
fn generate_lease_id() -> String {
    format!("lease_{}", uuid::Uuid::new_v4().simple())
}
