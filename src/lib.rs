//! DB Router Library
//!
//! Routes connection requests across dynamically registered data sources
//! (SQLite, PostgreSQL, MySQL or any custom provider) by routing key, with
//! wildcard load balancing and transaction-scoped connection sharing.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use context::{ContextSource, RequestContext, TaskContext};
pub use db::{RoutedConnection, RoutingDataSource};
pub use error::{DbError, DbResult};
