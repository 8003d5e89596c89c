//! Read-only enforcement for query templates.
//!
//! The directory never writes to the partner store, so every configured
//! template must parse as exactly one query statement. Templates are checked
//! once when a deployment is configured, not on every execution.
//!
//! Positional `?` markers are replaced by `NULL` before parsing so the check
//! does not depend on how each sqlparser dialect tokenizes placeholders.

use crate::db::dialect::DriverKind;
use crate::db::paginate::rewrite_placeholders;
use crate::error::{DirectoryError, DirectoryResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Kind of statement found in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStatement {
    /// SELECT, VALUES, WITH ... SELECT
    Query,
    /// INSERT, UPDATE, DELETE, MERGE
    Write,
    /// Anything else (DDL, transaction control, SET, CALL, ...)
    Other,
}

mod error_messages {
    pub const WRITE: &str = "Templates must not modify the partner store.";
    pub const OTHER: &str = "Templates must be a single SELECT query.";
    pub const MULTIPLE: &str = "Templates must contain exactly one statement.";
    pub const PARSE_ERROR: &str = "Failed to parse template.";
}

fn get_dialect(driver: DriverKind) -> Box<dyn Dialect> {
    match driver {
        DriverKind::Postgres => Box::new(PostgreSqlDialect {}),
        DriverKind::MySql => Box::new(MySqlDialect {}),
        DriverKind::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Check that the template named `name` is a single read-only query.
pub fn ensure_read_only(name: &str, sql: &str, driver: DriverKind) -> DirectoryResult<()> {
    let dialect = get_dialect(driver);
    let parseable = rewrite_placeholders(sql, |_| "NULL".to_string());

    let statements = Parser::parse_sql(dialect.as_ref(), &parseable).map_err(|e| {
        DirectoryError::configuration(
            format!("{} '{}': {}", error_messages::PARSE_ERROR, name, e),
            format!("Check the {} syntax of the '{}' template", driver, name),
        )
    })?;

    let statement = match statements.as_slice() {
        [statement] => statement,
        [] => {
            return Err(DirectoryError::configuration(
                format!("Template '{}' is empty", name),
                "Provide a SELECT statement",
            ));
        }
        _ => {
            return Err(DirectoryError::configuration(
                format!("{} '{}' has {}", error_messages::MULTIPLE, name, statements.len()),
                "Remove the trailing statements",
            ));
        }
    };

    let (kind, operation) = classify_statement(statement);
    match kind {
        TemplateStatement::Query => Ok(()),
        TemplateStatement::Write => Err(DirectoryError::configuration(
            format!("{} '{}' is {}", error_messages::WRITE, name, operation),
            "Rewrite the template as a SELECT",
        )),
        TemplateStatement::Other => Err(DirectoryError::configuration(
            format!("{} '{}' is {}", error_messages::OTHER, name, operation),
            "Rewrite the template as a SELECT",
        )),
    }
}

fn classify_statement(stmt: &Statement) -> (TemplateStatement, &'static str) {
    match stmt {
        Statement::Query { .. } => (TemplateStatement::Query, "SELECT"),

        Statement::Insert { .. } => (TemplateStatement::Write, "INSERT"),
        Statement::Update { .. } => (TemplateStatement::Write, "UPDATE"),
        Statement::Delete { .. } => (TemplateStatement::Write, "DELETE"),
        Statement::Merge { .. } => (TemplateStatement::Write, "MERGE"),
        Statement::Copy { .. } => (TemplateStatement::Write, "COPY"),

        Statement::CreateTable { .. } => (TemplateStatement::Other, "CREATE TABLE"),
        Statement::Drop { .. } => (TemplateStatement::Other, "DROP"),
        Statement::Truncate { .. } => (TemplateStatement::Other, "TRUNCATE"),
        Statement::StartTransaction { .. } => (TemplateStatement::Other, "BEGIN"),
        Statement::Commit { .. } => (TemplateStatement::Other, "COMMIT"),
        Statement::Rollback { .. } => (TemplateStatement::Other, "ROLLBACK"),
        Statement::Call { .. } => (TemplateStatement::Other, "CALL"),
        Statement::Grant { .. } => (TemplateStatement::Other, "GRANT"),
        _ => (TemplateStatement::Other, "not a query"),
    }
}
