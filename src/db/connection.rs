//! Connection and connection-provider abstractions.
//!
//! Every backing data source is a [`ConnectionProvider`] handing out
//! [`Connection`]s. The router never looks inside either one; it only picks
//! the provider and, inside a transaction, wraps the connection in a lease.

use crate::db::decrypt::CredentialDecryptor;
use crate::error::DbResult;
use crate::models::DatabaseType;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Upcast helper so trait objects can be downcast to their concrete type.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A live database connection.
///
/// `commit`, `rollback`, `close` and `set_auto_commit` are the lifecycle calls a
/// transaction lease may suppress; everything else always reaches the database.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str) -> DbResult<u64>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self) -> DbResult<()>;

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()>;

    async fn auto_commit(&self) -> DbResult<bool>;

    async fn is_closed(&self) -> bool;

    fn database_type(&self) -> DatabaseType;
}

/// A source of connections for one routing key (usually a pool).
#[async_trait]
pub trait ConnectionProvider: AsAny {
    /// Acquire a connection with the provider's own credentials.
    async fn acquire(&self) -> DbResult<Box<dyn Connection>>;

    /// Acquire a connection as a specific user.
    async fn acquire_with(&self, user: &str, password: &str) -> DbResult<Box<dyn Connection>>;

    /// Connection URL used for dialect detection and introspection.
    ///
    /// Implementations should mask credentials.
    fn url(&self) -> Option<String> {
        None
    }

    /// Replace encrypted credentials before the first connection is opened.
    fn decrypt_credentials(&self, _decryptor: &dyn CredentialDecryptor) -> DbResult<()> {
        Ok(())
    }

    /// Return `self` (or an inner object) as `type_id`, if this provider wraps one.
    fn unwrap_any(self: Arc<Self>, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        let any = self.into_any();
        if <dyn Any as Any>::type_id(&*any) == type_id {
            Some(any)
        } else {
            None
        }
    }
}

/// Detect the dialect of a provider from its URL.
pub fn detect_dialect(provider: &dyn ConnectionProvider) -> DatabaseType {
    DatabaseType::detect(provider.url().as_deref())
}
