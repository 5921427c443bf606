//! Database routing layer.
//!
//! This module provides:
//! - Connection and provider abstractions
//! - The data source registry and the key router
//! - Transaction-scoped connection leases and their coordinator
//! - The routing data source facade
//! - sqlx-backed providers (MySQL, PostgreSQL, SQLite)

pub mod connection;
pub mod data_source;
pub mod decrypt;
pub mod lease;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod registry;
pub mod router;
pub mod transaction_registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{Connection, ConnectionProvider, detect_dialect};
pub use data_source::{RoutedConnection, RoutingDataSource, RoutingDataSourceBuilder};
pub use decrypt::{Base64Decryptor, CredentialDecryptor};
pub use lease::{ConnectionLease, LeaseState, LifecycleCall};
pub use pool::{DbPool, SqlxConnection, SqlxProvider};
pub use registry::{DataSourceEntry, Registration, Registry, RegistryBuilder, RegistrySnapshot};
pub use router::{KeyPicker, LOAD_BALANCE_SUFFIX, MissingHandler, RandomPicker, Router};
pub use transaction_registry::{LeaseMetadata, TransactionCoordinator, TransactionRegistry};
