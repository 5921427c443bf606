//! Transaction registry holding connection leases per transaction.
//!
//! Every `(transaction id, routing key)` pair holds at most one
//! [`ConnectionLease`]. The registry never commits or rolls back anything: the
//! external transaction manager that owns the scope decides what happens to the
//! leases once the scope ends, typically via [`TransactionRegistry::release_transaction`].

use crate::db::lease::ConnectionLease;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tracks the leases handed out inside transaction scopes.
pub trait TransactionCoordinator: Send + Sync {
    /// The lease held for `(xid, key)`, if any.
    fn held(&self, xid: &str, key: &str) -> Option<Arc<ConnectionLease>>;

    /// Hold `lease` for `(xid, key)` unless another lease got there first.
    ///
    /// Returns the lease that is held afterwards, which is the earlier one on a race.
    fn hold(&self, xid: &str, key: &str, lease: Arc<ConnectionLease>) -> Arc<ConnectionLease>;

    /// Stop tracking `lease`. Returns `false` if it was not the held lease.
    fn release(&self, lease: &ConnectionLease) -> bool;
}

struct HeldLease {
    lease: Arc<ConnectionLease>,
    created_at: Instant,
}

/// Metadata about a held lease (for listing without touching the connection).
#[derive(Debug, Clone)]
pub struct LeaseMetadata {
    pub lease_id: String,
    pub transaction_id: String,
    pub routing_key: String,
    /// When the lease was first held (absolute time)
    pub started_at: DateTime<Utc>,
    /// Seconds since the lease was first held
    pub duration_secs: u64,
}

/// In-memory [`TransactionCoordinator`].
pub struct TransactionRegistry {
    /// transaction id -> routing key -> lease
    transactions: RwLock<HashMap<String, HashMap<String, HeldLease>>>,
    /// System start time for converting Instant to DateTime
    system_start_instant: Instant,
    /// System start time as UTC DateTime
    system_start_datetime: DateTime<Utc>,
}

impl TransactionRegistry {
    /// Create a new transaction registry.
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(HashMap::new()),
            system_start_instant: Instant::now(),
            system_start_datetime: Utc::now(),
        }
    }

    /// Number of held leases across all transactions.
    pub fn count(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    /// Ids of the transactions currently holding at least one lease.
    pub fn transaction_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// List all held leases with their metadata.
    pub fn list_all(&self) -> Vec<LeaseMetadata> {
        let txs = self.read();
        txs.values()
            .flat_map(HashMap::values)
            .map(|held| {
                let duration_secs = held.created_at.elapsed().as_secs();
                // Convert Instant to DateTime by calculating offset from system start
                let offset_from_start = held
                    .created_at
                    .duration_since(self.system_start_instant);
                let started_at = self.system_start_datetime + offset_from_start;

                LeaseMetadata {
                    lease_id: held.lease.id().to_string(),
                    transaction_id: held.lease.transaction_id().to_string(),
                    routing_key: held.lease.routing_key().to_string(),
                    started_at,
                    duration_secs,
                }
            })
            .collect()
    }

    /// Untrack every lease of `xid` and hand them back to the caller.
    ///
    /// Call this once the scope has ended; closing the returned leases then
    /// reaches the real connections.
    pub fn release_transaction(&self, xid: &str) -> Vec<Arc<ConnectionLease>> {
        let removed = self.write().remove(xid).unwrap_or_default();
        let leases: Vec<_> = removed.into_values().map(|held| held.lease).collect();
        if !leases.is_empty() {
            info!(
                transaction_id = %xid,
                lease_count = leases.len(),
                "Transaction leases released"
            );
        }
        leases
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HashMap<String, HeldLease>>> {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HashMap<String, HeldLease>>> {
        self.transactions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransactionCoordinator for TransactionRegistry {
    fn held(&self, xid: &str, key: &str) -> Option<Arc<ConnectionLease>> {
        self.read()
            .get(xid)
            .and_then(|leases| leases.get(key))
            .map(|held| Arc::clone(&held.lease))
    }

    fn hold(&self, xid: &str, key: &str, lease: Arc<ConnectionLease>) -> Arc<ConnectionLease> {
        let mut txs = self.write();
        let leases = txs.entry(xid.to_string()).or_default();

        if let Some(existing) = leases.get(key) {
            warn!(
                transaction_id = %xid,
                routing_key = %key,
                lease_id = %existing.lease.id(),
                "Lease already held; keeping the earlier one"
            );
            return Arc::clone(&existing.lease);
        }

        leases.insert(
            key.to_string(),
            HeldLease {
                lease: Arc::clone(&lease),
                created_at: Instant::now(),
            },
        );
        debug!(
            transaction_id = %xid,
            routing_key = %key,
            lease_id = %lease.id(),
            "Lease held"
        );
        lease
    }

    fn release(&self, lease: &ConnectionLease) -> bool {
        let mut txs = self.write();
        let xid = lease.transaction_id();
        let Some(leases) = txs.get_mut(xid) else {
            return false;
        };

        let matches = leases
            .get(lease.routing_key())
            .is_some_and(|held| held.lease.id() == lease.id());
        if matches {
            leases.remove(lease.routing_key());
            if leases.is_empty() {
                txs.remove(xid);
            }
        }
        matches
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("lease_count", &self.count())
            .finish_non_exhaustive()
    }
}
