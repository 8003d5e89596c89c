//! Dialect descriptors.
//!
//! A dialect bundles everything the directory needs to know about a SQL
//! engine: which sqlx driver talks to it, the statement used to probe a new
//! pool, how it windows a result set, and how positional markers look on
//! the wire. The executor never matches on engine names; it only reads the
//! descriptor it was handed.

use crate::error::{DirectoryError, DirectoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The sqlx driver used to reach a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Postgres,
    MySql,
    Sqlite,
}

impl DriverKind {
    /// URL schemes accepted for this driver.
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            DriverKind::Postgres => &["postgres", "postgresql"],
            DriverKind::MySql => &["mysql", "mariadb"],
            DriverKind::Sqlite => &["sqlite"],
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Postgres => write!(f, "postgresql"),
            DriverKind::MySql => write!(f, "mysql"),
            DriverKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// How a dialect limits a result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategy {
    /// Trailing `limit ? offset ?` (PostgreSQL, SQLite, H2, HSQLDB).
    LimitOffset,
    /// Trailing `limit ?, ?` with the offset first (MySQL, MariaDB).
    OffsetCommaLimit,
    /// Leading `select first ? skip ?` (Firebird, Informix).
    FirstSkip,
}

/// How positional parameters are written in statements sent to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?` markers are sent as written.
    Question,
    /// `?` markers are renumbered to `$1..$n` before binding.
    Numbered,
}

/// Immutable description of one SQL dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectDescriptor {
    /// Display name shown to administrators, e.g. "PostgreSQL 10+".
    pub name: String,
    /// Other names accepted when selecting this dialect.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub driver: DriverKind,
    /// Statement executed once against a freshly built pool.
    pub probe: String,
    pub pagination: PaginationStrategy,
    pub placeholders: PlaceholderStyle,
}

impl DialectDescriptor {
    pub fn postgres() -> Self {
        Self {
            name: "PostgreSQL 10+".to_string(),
            aliases: vec!["postgresql".to_string(), "postgres".to_string()],
            driver: DriverKind::Postgres,
            probe: "SELECT 1".to_string(),
            pagination: PaginationStrategy::LimitOffset,
            placeholders: PlaceholderStyle::Numbered,
        }
    }

    pub fn mysql() -> Self {
        Self {
            name: "MySQL 8+".to_string(),
            aliases: vec!["mysql".to_string(), "mariadb".to_string()],
            driver: DriverKind::MySql,
            probe: "SELECT 1".to_string(),
            pagination: PaginationStrategy::OffsetCommaLimit,
            placeholders: PlaceholderStyle::Question,
        }
    }

    pub fn sqlite() -> Self {
        Self {
            name: "SQLite 3".to_string(),
            aliases: vec!["sqlite".to_string()],
            driver: DriverKind::Sqlite,
            probe: "SELECT 1".to_string(),
            pagination: PaginationStrategy::LimitOffset,
            placeholders: PlaceholderStyle::Question,
        }
    }

    /// Whether `name` selects this dialect (case-insensitive).
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// The set of dialects a deployment may select from.
#[derive(Debug, Clone)]
pub struct DialectCatalog {
    dialects: Vec<Arc<DialectDescriptor>>,
}

impl DialectCatalog {
    /// Catalog with no dialects. Mostly useful in tests.
    pub fn empty() -> Self {
        Self {
            dialects: Vec::new(),
        }
    }

    /// Add a dialect. A dialect with the same display name is replaced.
    pub fn register(&mut self, descriptor: DialectDescriptor) {
        self.dialects
            .retain(|d| !d.name.eq_ignore_ascii_case(&descriptor.name));
        self.dialects.push(Arc::new(descriptor));
    }

    /// Find a dialect by display name or alias.
    pub fn lookup(&self, name: &str) -> DirectoryResult<Arc<DialectDescriptor>> {
        self.dialects
            .iter()
            .find(|d| d.matches(name))
            .cloned()
            .ok_or_else(|| {
                DirectoryError::configuration(
                    format!("Unknown dialect '{}'", name),
                    format!("Supported dialects: {}", self.names().join(", ")),
                )
            })
    }

    /// Display names of every registered dialect, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.dialects.iter().map(|d| d.name.clone()).collect()
    }
}

impl Default for DialectCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.register(DialectDescriptor::postgres());
        catalog.register(DialectDescriptor::mysql());
        catalog.register(DialectDescriptor::sqlite());
        catalog
    }
}
