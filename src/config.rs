//! Configuration handling for the partner directory.
//!
//! A deployment is described by a [`DeploymentConfig`], usually deserialized
//! from the host's admin configuration. The command-line [`Config`] builds
//! one from flags and `DIRECTORY_*` environment variables.

use crate::credential::CredentialPolicy;
use crate::db::PoolSettings;
use crate::db::pool::pool_name;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::QueryTemplateSet;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider id used in pool names.
pub const PROVIDER_ID: &str = "openspp";

pub const DEFAULT_DIALECT: &str = "PostgreSQL 10+";
pub const DEFAULT_DEPLOYMENT_ID: &str = "openspp";

// Pool configuration defaults
pub const DEFAULT_MIN_IDLE: u32 = 5;
pub const DEFAULT_MAX_SIZE: u32 = 50;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;

/// Connection pool sizing and timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Connections kept open while idle (default: 5)
    pub min_idle: Option<u32>,
    /// Maximum connections in pool (default: 50)
    pub max_size: Option<u32>,
    /// Connection acquire timeout in milliseconds (default: 30000)
    pub connect_timeout_ms: Option<u64>,
    /// Idle timeout in milliseconds (default: 600000)
    pub idle_timeout_ms: Option<u64>,
    /// Maximum connection lifetime in milliseconds (default: 1800000)
    pub max_lifetime_ms: Option<u64>,
}

impl PoolOptions {
    pub fn min_idle_or_default(&self) -> u32 {
        self.min_idle.unwrap_or(DEFAULT_MIN_IDLE)
    }

    pub fn max_size_or_default(&self) -> u32 {
        self.max_size.unwrap_or(DEFAULT_MAX_SIZE)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS))
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms.unwrap_or(DEFAULT_MAX_LIFETIME_MS))
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let max = self.max_size_or_default();
        if max == 0 {
            return Err("max_size must be greater than 0".to_string());
        }
        let min = self.min_idle_or_default();
        if min > max {
            return Err(format!(
                "min_idle ({}) cannot exceed max_size ({})",
                min, max
            ));
        }
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("max_lifetime_ms", self.max_lifetime_ms),
        ] {
            if value == Some(0) {
                return Err(format!("{} must be greater than 0", name));
            }
        }
        Ok(())
    }
}

/// Everything needed to serve one deployment's partner store.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Stable id; also the provider segment of federated ids.
    pub id: String,
    /// Display name, used in pool names.
    #[serde(default)]
    pub name: String,
    /// Connection URL. A leading `jdbc:` is accepted.
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Dialect display name or alias.
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default)]
    pub pool: PoolOptions,
    #[serde(default)]
    pub templates: QueryTemplateSet,
    /// Password hashing scheme, or `detect` to classify each stored hash.
    #[serde(default)]
    pub hashing: CredentialPolicy,
}

fn default_dialect() -> String {
    DEFAULT_DIALECT.to_string()
}

impl std::fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &crate::db::pool::mask_url(&self.url))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dialect", &self.dialect)
            .field("pool", &self.pool)
            .field("hashing", &self.hashing)
            .finish_non_exhaustive()
    }
}

impl DeploymentConfig {
    /// A deployment with default dialect, pool options, templates and hashing.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            url: url.into(),
            user: None,
            password: None,
            dialect: default_dialect(),
            pool: PoolOptions::default(),
            templates: QueryTemplateSet::default(),
            hashing: CredentialPolicy::default(),
        }
    }

    /// Parse a deployment from JSON.
    pub fn from_json(json: &str) -> DirectoryResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            DirectoryError::configuration(
                format!("Invalid deployment configuration: {}", e),
                "Check the JSON against the documented fields",
            )
        })
    }

    /// Check the fields that do not need a connection to validate.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.id.trim().is_empty() {
            return Err(DirectoryError::configuration(
                "Deployment id is empty",
                "Set a stable id for the deployment",
            ));
        }
        if self.url.trim().is_empty() {
            return Err(DirectoryError::configuration(
                "Connection URL is empty",
                "Set a URL such as postgresql://host:5432/openspp",
            ));
        }
        self.pool
            .validate()
            .map_err(|e| DirectoryError::configuration(e, "Adjust the pool options"))
    }

    /// Pool settings with a freshly stamped pool name.
    pub fn pool_settings(&self, provider_id: &str) -> PoolSettings {
        let name = if self.name.is_empty() {
            self.id.as_str()
        } else {
            self.name.as_str()
        };
        PoolSettings {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            pool_name: pool_name(provider_id, name),
            options: self.pool.clone(),
        }
    }
}

/// Command-line configuration for the partner directory.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "partner-directory",
    about = "Look up partners and verify credentials against an Odoo partner store",
    version,
    author
)]
pub struct Config {
    /// Deployment id (provider segment of federated ids)
    #[arg(long, default_value = DEFAULT_DEPLOYMENT_ID, env = "DIRECTORY_ID")]
    pub deployment_id: String,

    /// Deployment display name
    #[arg(long, default_value = "", env = "DIRECTORY_NAME")]
    pub deployment_name: String,

    /// Connection URL, e.g. postgresql://host:5432/openspp
    #[arg(long, value_name = "URL", env = "DIRECTORY_URL")]
    pub url: Option<String>,

    /// Database user (overrides the URL)
    #[arg(long, env = "DIRECTORY_USER")]
    pub user: Option<String>,

    /// Database password (overrides the URL)
    #[arg(long, env = "DIRECTORY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Dialect display name or alias
    #[arg(long, default_value = DEFAULT_DIALECT, env = "DIRECTORY_DIALECT")]
    pub dialect: String,

    /// Connections kept open while idle
    #[arg(long, env = "DIRECTORY_MIN_IDLE")]
    pub min_idle: Option<u32>,

    /// Maximum pool size
    #[arg(long, env = "DIRECTORY_MAX_SIZE")]
    pub max_size: Option<u32>,

    /// Connection acquire timeout in milliseconds
    #[arg(long, env = "DIRECTORY_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Idle connection timeout in milliseconds
    #[arg(long, env = "DIRECTORY_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Maximum connection lifetime in milliseconds
    #[arg(long, env = "DIRECTORY_MAX_LIFETIME_MS")]
    pub max_lifetime_ms: Option<u64>,

    /// JSON file overriding any of the query templates
    #[arg(long, value_name = "FILE", env = "DIRECTORY_TEMPLATES")]
    pub templates: Option<PathBuf>,

    /// Password hashing scheme, or "detect"
    #[arg(long, default_value = "detect", env = "DIRECTORY_HASHING")]
    pub hashing: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "DIRECTORY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DIRECTORY_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// What to run.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List the selectable dialects
    Dialects,
    #[command(flatten)]
    Directory(DirectoryCommand),
}

/// Operations that run against a configured deployment.
#[derive(Debug, Clone, Subcommand)]
pub enum DirectoryCommand {
    /// Count partners, optionally only those matching a search term
    Count {
        #[arg(long)]
        search: Option<String>,
    },
    /// Look up a partner by row id or federated id
    FindId { id: String },
    /// Look up a partner by username
    FindUsername { username: String },
    /// Look up a partner by email
    FindEmail { email: String },
    /// Search partners; "*" lists everyone
    Search {
        #[arg(default_value = "*")]
        term: String,
        #[arg(long, default_value_t = 0)]
        first: u32,
        #[arg(long, default_value_t = 100)]
        max: u32,
    },
    /// Resolve a beneficiary login form
    Beneficiary {
        #[arg(long)]
        household: String,
        #[arg(long)]
        uid: String,
        #[arg(long)]
        phone: String,
    },
    /// Verify a password by username or Unified ID
    Verify {
        #[arg(long, conflicts_with = "uid", required_unless_present = "uid")]
        username: Option<String>,
        #[arg(long)]
        uid: Option<String>,
        #[arg(long, env = "DIRECTORY_VERIFY_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            min_idle: self.min_idle,
            max_size: self.max_size,
            connect_timeout_ms: self.connect_timeout_ms,
            idle_timeout_ms: self.idle_timeout_ms,
            max_lifetime_ms: self.max_lifetime_ms,
        }
    }

    /// Build the deployment described by the flags.
    pub fn deployment(&self) -> DirectoryResult<DeploymentConfig> {
        let url = self.url.clone().ok_or_else(|| {
            DirectoryError::configuration(
                "No connection URL given",
                "Pass --url or set DIRECTORY_URL",
            )
        })?;
        let hashing = self.hashing.parse::<CredentialPolicy>().map_err(|e| {
            DirectoryError::configuration(e.to_string(), "Use a listed hashing algorithm or 'detect'")
        })?;
        let templates = match &self.templates {
            Some(path) => load_templates(path)?,
            None => QueryTemplateSet::default(),
        };

        Ok(DeploymentConfig {
            id: self.deployment_id.clone(),
            name: self.deployment_name.clone(),
            url,
            user: self.user.clone(),
            password: self.password.clone(),
            dialect: self.dialect.clone(),
            pool: self.pool_options(),
            templates,
            hashing,
        })
    }
}

/// Read a template override file. Missing fields keep their defaults.
pub fn load_templates(path: &Path) -> DirectoryResult<QueryTemplateSet> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DirectoryError::configuration(
            format!("Cannot read templates from {}: {}", path.display(), e),
            "Check the --templates path",
        )
    })?;
    serde_json::from_str(&content).map_err(|e| {
        DirectoryError::configuration(
            format!("Invalid templates in {}: {}", path.display(), e),
            "Templates are a JSON object keyed by template name",
        )
    })
}
