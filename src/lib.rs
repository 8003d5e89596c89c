//! Partner Directory Library
//!
//! Federated identity lookups and credential verification against an
//! externally owned Odoo-style partner store (PostgreSQL, MySQL, SQLite).
//! Deployments describe the store through SQL templates; the library pools
//! connections, windows and binds those templates, maps rows to identity
//! records and checks passwords against the hashes the store keeps.

pub mod config;
pub mod credential;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;

pub use config::{Config, DeploymentConfig};
pub use credential::{CredentialPolicy, HashScheme};
pub use directory::{BeneficiaryForm, CredentialKey, Directory, DirectoryFactory};
pub use error::{DirectoryError, DirectoryResult};
pub use models::IdentityRecord;
