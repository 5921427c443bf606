//! Request-scoped routing context.
//!
//! The routing key and the transaction id are owned by the caller. The router
//! only reads them through [`ContextSource`]. [`RequestContext::scope`] binds a
//! context to the current task with a `tokio::task_local!`, so it follows the
//! future across worker threads and disappears when the scope ends.

use std::future::Future;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Read access to the ambient routing key and transaction id.
pub trait ContextSource: Send + Sync {
    /// Routing key selecting the backing data source, if any.
    fn routing_key(&self) -> Option<String>;

    /// Id of the logical transaction the caller is running in, if any.
    fn transaction_id(&self) -> Option<String>;
}

/// A routing key / transaction id pair for one call chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    routing_key: Option<String>,
    transaction_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing key. Empty keys are stored as absent.
    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = non_empty(key.into());
        self
    }

    /// Set the transaction id. Empty ids are stored as absent.
    pub fn with_transaction_id(mut self, xid: impl Into<String>) -> Self {
        self.transaction_id = non_empty(xid.into());
        self
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Run `fut` with this context installed for the current task.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// Run a synchronous closure with this context installed.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }

    /// Snapshot of the context bound to the current task, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }
}

impl ContextSource for RequestContext {
    fn routing_key(&self) -> Option<String> {
        self.routing_key.clone()
    }

    fn transaction_id(&self) -> Option<String> {
        self.transaction_id.clone()
    }
}

/// [`ContextSource`] reading whatever [`RequestContext`] is bound to the running task.
///
/// Outside any scope both values are absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskContext;

impl ContextSource for TaskContext {
    fn routing_key(&self) -> Option<String> {
        CURRENT
            .try_with(|ctx| ctx.routing_key.clone())
            .ok()
            .flatten()
    }

    fn transaction_id(&self) -> Option<String> {
        CURRENT
            .try_with(|ctx| ctx.transaction_id.clone())
            .ok()
            .flatten()
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
