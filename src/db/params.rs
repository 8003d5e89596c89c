//! Parameter planning and binding.
//!
//! A template is bound positionally when the caller supplies exactly as many
//! values as it has markers. Any other count means a single search term was
//! supplied for a template that repeats it across several columns; the first
//! value is then wrapped as `%term%` and bound to every marker.

use crate::error::{DirectoryError, DirectoryResult};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};
use std::fmt;

/// A single positional value bound to a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl QueryParam {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Substring-match form of this value.
    fn wildcard(&self) -> Self {
        match self {
            QueryParam::Null => QueryParam::Null,
            other => QueryParam::Text(format!("%{}%", other)),
        }
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryParam::Null => write!(f, "NULL"),
            QueryParam::Bool(v) => write!(f, "{}", v),
            QueryParam::Int(v) => write!(f, "{}", v),
            QueryParam::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        QueryParam::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        QueryParam::Text(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        QueryParam::Int(value)
    }
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        QueryParam::Bool(value)
    }
}

/// Decide the values bound to a statement with `placeholders` markers.
pub fn bind_plan(placeholders: usize, params: &[QueryParam]) -> DirectoryResult<Vec<QueryParam>> {
    if params.len() == placeholders {
        return Ok(params.to_vec());
    }
    let Some(first) = params.first() else {
        return Err(DirectoryError::invalid_input(format!(
            "Statement expects {} parameter(s) but none were supplied",
            placeholders
        )));
    };
    tracing::debug!(
        placeholders,
        supplied = params.len(),
        "Parameter count differs from marker count, binding first value as a wildcard"
    );
    Ok(vec![first.wildcard(); placeholders])
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Text(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Text(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Text(v) => query.bind(v.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_count_binds_as_is() {
        let params = vec![QueryParam::text("HH-001"), QueryParam::text("UID-42"), QueryParam::text("+100000")];
        assert_eq!(bind_plan(3, &params).unwrap(), params);
    }

    #[test]
    fn test_single_term_fans_out_as_wildcard() {
        let plan = bind_plan(3, &[QueryParam::text("ali")]).unwrap();
        assert_eq!(plan, vec![QueryParam::text("%ali%"); 3]);
    }

    #[test]
    fn test_extra_params_use_first_only() {
        let plan = bind_plan(2, &[QueryParam::text("a"), QueryParam::text("b"), QueryParam::text("c")])
            .unwrap();
        assert_eq!(plan, vec![QueryParam::text("%a%"), QueryParam::text("%a%")]);
    }

    #[test]
    fn test_no_params_no_markers() {
        assert!(bind_plan(0, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_params_is_invalid_input() {
        let err = bind_plan(1, &[]).unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidInput { .. }));
    }

    #[test]
    fn test_null_wildcard_stays_null() {
        let plan = bind_plan(2, &[QueryParam::Null]).unwrap();
        assert_eq!(plan, vec![QueryParam::Null, QueryParam::Null]);
    }

    #[test]
    fn test_int_wildcard_is_text() {
        let plan = bind_plan(2, &[QueryParam::Int(42)]).unwrap();
        assert_eq!(plan[0], QueryParam::text("%42%"));
    }
}
