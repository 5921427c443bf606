//! Backend dispatch macros for the sqlx-backed provider.
//!
//! sqlx has no object-safe connection type shared by all drivers, so every
//! operation is written once and expanded per backend.

/// Expand `$body` once per [`DbPool`](crate::db::pool::DbPool) variant.
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Bind `$conn` to the live driver connection of a `RawConnection` and run `$body`.
///
/// `$body` is expanded for every backend, so it may only use calls that every
/// sqlx driver supports.
macro_rules! with_connection {
    ($raw:expr, |$conn:ident| $body:expr) => {
        match $raw {
            $crate::db::pool::RawConnection::MySql(held) => {
                let $conn = held.conn();
                $body
            }
            $crate::db::pool::RawConnection::Postgres(held) => {
                let $conn = held.conn();
                $body
            }
            $crate::db::pool::RawConnection::SQLite(held) => {
                let $conn = held.conn();
                $body
            }
        }
    };
}

pub use impl_db_dispatch;
pub(crate) use with_connection;
