//! Template execution engine.
//!
//! Executes configured templates against the active pool of a deployment:
//! - optional result windowing through [`paginate`]
//! - positional or fanned-out wildcard binding through [`bind_plan`]
//! - `$n` renumbering for dialects that need it
//! - reduction to attribute maps or to a single first-row scalar
//!
//! # Architecture
//!
//! Driver-specific fetch code lives in the `mysql`, `postgres` and `sqlite`
//! submodules, generated from one macro so all three stay identical apart
//! from their binder.

use crate::db::dialect::{DialectDescriptor, PlaceholderStyle};
use crate::db::paginate::{Pageable, count_placeholders, number_placeholders, paginate};
use crate::db::params::{QueryParam, bind_plan};
use crate::db::pool::ActivePool;
use crate::db::types::AttributeMap;
use crate::error::{DirectoryError, DirectoryResult};
use crate::impl_db_dispatch;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Runs templates against one captured pool.
///
/// The executor holds its own `Arc` to the pool and to the dialect the pool
/// was published with, so a reconfiguration that happens mid-call does not
/// affect it.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<ActivePool>,
    dialect: Arc<DialectDescriptor>,
}

impl QueryExecutor {
    pub fn new(pool: Arc<ActivePool>, dialect: Arc<DialectDescriptor>) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &ActivePool {
        &self.pool
    }

    pub fn dialect(&self) -> &DialectDescriptor {
        &self.dialect
    }

    /// Produce the statement and the values sent to the driver.
    pub fn prepare(
        &self,
        template: &str,
        page: Option<&Pageable>,
        params: &[QueryParam],
    ) -> DirectoryResult<(String, Vec<QueryParam>)> {
        let dialect = &*self.dialect;
        let sql = match page {
            Some(page) => paginate(template, page, dialect),
            None => template.to_string(),
        };
        let bound = bind_plan(count_placeholders(&sql), params)?;
        let sql = match dialect.placeholders {
            PlaceholderStyle::Numbered => number_placeholders(&sql),
            PlaceholderStyle::Question => sql,
        };
        Ok((sql, bound))
    }

    /// Execute a template and return every row as an attribute map.
    pub async fn fetch_rows(
        &self,
        template: &str,
        page: Option<&Pageable>,
        params: &[QueryParam],
    ) -> DirectoryResult<Vec<AttributeMap>> {
        let start = Instant::now();
        let (sql, bound) = self.prepare(template, page, params)?;

        debug!(
            pool = %self.pool.name(),
            sql = %sql,
            params = bound.len(),
            "Executing template"
        );

        let rows = impl_db_dispatch!(self.pool.pool(), {
            MySql(p) => mysql::fetch_all(p, &sql, &bound).await?,
            Postgres(p) => postgres::fetch_all(p, &sql, &bound).await?,
            Sqlite(p) => sqlite::fetch_all(p, &sql, &bound).await?,
        });

        debug!(
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Template returned"
        );
        Ok(rows)
    }

    /// First column of the first row, rendered as text.
    pub async fn fetch_text(
        &self,
        template: &str,
        params: &[QueryParam],
    ) -> DirectoryResult<Option<String>> {
        let (sql, bound) = self.prepare(template, None, params)?;

        debug!(
            pool = %self.pool.name(),
            sql = %sql,
            params = bound.len(),
            "Executing scalar template"
        );

        let value = impl_db_dispatch!(self.pool.pool(), {
            MySql(p) => mysql::fetch_first(p, &sql, &bound).await?,
            Postgres(p) => postgres::fetch_first(p, &sql, &bound).await?,
            Sqlite(p) => sqlite::fetch_first(p, &sql, &bound).await?,
        });
        Ok(value)
    }

    /// First column of the first row as an integer.
    pub async fn fetch_integer(
        &self,
        template: &str,
        params: &[QueryParam],
    ) -> DirectoryResult<Option<i64>> {
        match self.fetch_text(template, params).await? {
            Some(text) => parse_integer(&text).map(Some),
            None => Ok(None),
        }
    }

    /// First column of the first row as a boolean.
    pub async fn fetch_boolean(
        &self,
        template: &str,
        params: &[QueryParam],
    ) -> DirectoryResult<Option<bool>> {
        match self.fetch_text(template, params).await? {
            Some(text) => parse_boolean(&text).map(Some),
            None => Ok(None),
        }
    }
}

fn parse_integer(text: &str) -> DirectoryResult<i64> {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    // Decimal columns holding whole numbers, e.g. "42.000"
    match trimmed.split_once('.') {
        Some((whole, fraction)) if fraction.chars().all(|c| c == '0') => whole
            .parse::<i64>()
            .map_err(|_| DirectoryError::decode(format!("'{}' is not an integer", text))),
        _ => Err(DirectoryError::decode(format!("'{}' is not an integer", text))),
    }
}

fn parse_boolean(text: &str) -> DirectoryResult<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "y" | "yes" => Ok(true),
        "f" | "false" | "0" | "n" | "no" => Ok(false),
        _ => Err(DirectoryError::decode(format!("'{}' is not a boolean", text))),
    }
}

/// Generates the driver-specific fetch functions.
macro_rules! driver_fetch {
    ($module:ident, $pool:ty, $binder:path) => {
        mod $module {
            use super::*;
            use crate::db::types::RowToAttributes;

            pub async fn fetch_all(
                pool: &$pool,
                sql: &str,
                params: &[QueryParam],
            ) -> DirectoryResult<Vec<AttributeMap>> {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = $binder(query, param);
                }
                let rows = query.fetch_all(pool).await?;
                Ok(rows.iter().map(|row| row.to_attributes()).collect())
            }

            pub async fn fetch_first(
                pool: &$pool,
                sql: &str,
                params: &[QueryParam],
            ) -> DirectoryResult<Option<String>> {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = $binder(query, param);
                }
                let row = query.fetch_optional(pool).await?;
                Ok(row.and_then(|row| row.column_text(0)))
            }
        }
    };
}

driver_fetch!(mysql, sqlx::MySqlPool, crate::db::params::bind_mysql_param);
driver_fetch!(postgres, sqlx::PgPool, crate::db::params::bind_postgres_param);
driver_fetch!(sqlite, sqlx::SqlitePool, crate::db::params::bind_sqlite_param);
