//! Data models for the partner directory.
//!
//! This module re-exports the template and identity types used throughout
//! the application.

pub mod identity;
pub mod templates;

pub use identity::IdentityRecord;
pub use templates::{DEFAULT_VIEW, DeploymentSnapshot, QueryTemplateSet, SnapshotRegistry};
