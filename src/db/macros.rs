//! Per-driver dispatch macro.
//!
//! Expands to a plain `match` over the `DbPool` variants so each driver arm
//! stays readable and monomorphic.

/// Match a `DbPool` and run one body per driver.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => mysql::fetch_all(p, &sql, &params).await?,
///     Postgres(p) => postgres::fetch_all(p, &sql, &params).await?,
///     Sqlite(p) => sqlite::fetch_all(p, &sql, &params).await?,
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

pub use impl_db_dispatch;
