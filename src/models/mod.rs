//! Data models for the database router.

pub mod connection;

pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType, mask_password};
