//! Query templates and the per-deployment template registry.
//!
//! A deployment describes the partner store purely through SQL templates;
//! column names and table layout are whatever those templates select. The
//! registry publishes each deployment's pool, templates, dialect and hashing
//! policy as one immutable [`DeploymentSnapshot`]. Readers clone the `Arc`
//! once at the start of an operation and never see a mix of old and new
//! values.

use crate::credential::CredentialPolicy;
use crate::db::dialect::DialectDescriptor;
use crate::db::executor::QueryExecutor;
use crate::db::guard::ensure_read_only;
use crate::db::paginate::count_placeholders;
use crate::db::pool::ActivePool;
use crate::error::{DirectoryError, DirectoryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Default view exposing partners to the identity provider.
pub const DEFAULT_VIEW: &str = "spp_partner_oidc";

/// Columns selected by the lookup templates.
const PARTNER_COLUMNS: &str = "id, id AS partner_id, username, email, phone, first_name, last_name, full_name, active_group";

/// The eight statements a deployment runs against its partner store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryTemplateSet {
    /// Counts every partner. No parameters.
    pub count: String,
    /// Lists every partner. No parameters.
    pub list_all: String,
    /// One parameter: the row id.
    pub find_by_id: String,
    /// One parameter: the username.
    pub find_by_username: String,
    /// One or more parameters, all bound to the search term.
    pub find_by_search_term: String,
    /// One parameter: the username. Selects the stored hash.
    pub find_password_hash: String,
    /// One parameter: the identity document value. Selects the stored hash.
    pub find_password_hash_alt: String,
    /// Three parameters: household number, uid, phone.
    pub find_by_beneficiary_form: String,
}

impl Default for QueryTemplateSet {
    fn default() -> Self {
        Self::for_view(DEFAULT_VIEW)
    }
}

impl QueryTemplateSet {
    /// Built-in templates over a partner view named `view`.
    ///
    /// They stick to SQL every catalog dialect accepts: bare identifiers and
    /// a case-insensitive search through `LOWER(..) LIKE LOWER(?)`.
    pub fn for_view(view: &str) -> Self {
        Self {
            count: format!("SELECT COUNT(*) FROM {}", view),
            list_all: format!("SELECT {} FROM {}", PARTNER_COLUMNS, view),
            find_by_id: format!("SELECT {} FROM {} WHERE id = ?", PARTNER_COLUMNS, view),
            find_by_username: format!(
                "SELECT {} FROM {} WHERE username = ?",
                PARTNER_COLUMNS, view
            ),
            find_by_search_term: format!(
                concat!(
                    "SELECT {} FROM {} ",
                    "WHERE LOWER(username) LIKE LOWER(?) ",
                    "OR LOWER(email) LIKE LOWER(?) ",
                    "OR LOWER(full_name) LIKE LOWER(?)"
                ),
                PARTNER_COLUMNS, view
            ),
            find_password_hash: format!("SELECT password FROM {} WHERE username = ?", view),
            find_password_hash_alt: format!(
                "SELECT password FROM {} WHERE id_type_value = ?",
                view
            ),
            find_by_beneficiary_form: format!(
                concat!(
                    "SELECT id, id AS partner_id, username, email, phone, first_name, last_name, full_name, ",
                    "is_group, active_group, kind_name, id_type_name, id_type_value, ",
                    "group_membership_kind_name, group_membership_is_ended ",
                    "FROM {} ",
                    "WHERE username = ? OR (group_membership_is_ended = false ",
                    "AND group_membership_kind_name = 'Head' ",
                    "AND id_type_name = 'Unified ID' ",
                    "AND id_type_value = ? AND phone = ?)"
                ),
                view
            ),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("count", self.count.as_str()),
            ("list_all", self.list_all.as_str()),
            ("find_by_id", self.find_by_id.as_str()),
            ("find_by_username", self.find_by_username.as_str()),
            ("find_by_search_term", self.find_by_search_term.as_str()),
            ("find_password_hash", self.find_password_hash.as_str()),
            ("find_password_hash_alt", self.find_password_hash_alt.as_str()),
            ("find_by_beneficiary_form", self.find_by_beneficiary_form.as_str()),
        ]
    }

    /// Check that each template has the number of markers its operation binds.
    pub fn validate(&self) -> DirectoryResult<()> {
        for (name, sql) in self.entries() {
            if sql.trim().is_empty() {
                return Err(DirectoryError::configuration(
                    format!("Template '{}' is empty", name),
                    "Provide a SELECT statement or omit the field to use the default",
                ));
            }
            let found = count_placeholders(sql);
            let ok = match name {
                "count" | "list_all" => found == 0,
                "find_by_search_term" => found >= 1,
                "find_by_beneficiary_form" => found == 3,
                _ => found == 1,
            };
            if !ok {
                let expected = match name {
                    "count" | "list_all" => "no",
                    "find_by_search_term" => "at least one",
                    "find_by_beneficiary_form" => "three",
                    _ => "exactly one",
                };
                return Err(DirectoryError::configuration(
                    format!(
                        "Template '{}' has {} placeholder(s), expected {}",
                        name, found, expected
                    ),
                    "Use '?' for each bound value",
                ));
            }
        }
        Ok(())
    }

    /// Validate marker counts, then check every template is a read-only query.
    pub fn validate_for(&self, dialect: &DialectDescriptor) -> DirectoryResult<()> {
        self.validate()?;
        for (name, sql) in self.entries() {
            ensure_read_only(name, sql, dialect.driver)?;
        }
        Ok(())
    }
}

/// Everything a directory operation needs, captured at its start.
///
/// The pool travels with the templates and dialect it was opened for, so a
/// reader can never pair one deployment generation's templates with
/// another's store.
#[derive(Debug, Clone)]
pub struct DeploymentSnapshot {
    pub version: u64,
    pub pool: Arc<ActivePool>,
    pub templates: QueryTemplateSet,
    pub dialect: Arc<DialectDescriptor>,
    pub credential_policy: CredentialPolicy,
}

impl DeploymentSnapshot {
    /// An executor bound to this snapshot's pool and dialect.
    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(Arc::clone(&self.pool), Arc::clone(&self.dialect))
    }
}

/// Deployment snapshots keyed by deployment id.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    snapshots: RwLock<HashMap<String, Arc<DeploymentSnapshot>>>,
    version: AtomicU64,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a new snapshot for `deployment_id`.
    ///
    /// An invalid template set, or a pool opened for another driver, leaves
    /// the current snapshot in place.
    pub fn publish(
        &self,
        deployment_id: &str,
        pool: Arc<ActivePool>,
        templates: QueryTemplateSet,
        dialect: Arc<DialectDescriptor>,
        credential_policy: CredentialPolicy,
    ) -> DirectoryResult<Arc<DeploymentSnapshot>> {
        templates.validate_for(&dialect)?;
        let driver = pool.pool().driver();
        if driver != dialect.driver {
            return Err(DirectoryError::configuration(
                format!(
                    "Pool '{}' is a {} pool but dialect '{}' expects {}",
                    pool.name(),
                    driver,
                    dialect.name,
                    dialect.driver
                ),
                "Open the pool with the dialect it is published under",
            ));
        }

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(DeploymentSnapshot {
            version,
            pool,
            templates,
            dialect,
            credential_policy,
        });
        let previous = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deployment_id.to_string(), Arc::clone(&snapshot));

        info!(
            deployment = %deployment_id,
            version,
            pool = %snapshot.pool.name(),
            dialect = %snapshot.dialect.name,
            replaced = previous.is_some(),
            "Published deployment snapshot"
        );
        Ok(snapshot)
    }

    pub fn snapshot(&self, deployment_id: &str) -> Option<Arc<DeploymentSnapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(deployment_id)
            .cloned()
    }

    pub fn remove(&self, deployment_id: &str) -> Option<Arc<DeploymentSnapshot>> {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(deployment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::dialect::DialectCatalog;
    use crate::db::pool::{PoolManager, PoolSettings};

    #[test]
    fn test_default_templates_are_valid() {
        let templates = QueryTemplateSet::default();
        templates.validate().unwrap();
        templates.validate_for(&DialectDescriptor::postgres()).unwrap();
        assert!(templates.count.contains(DEFAULT_VIEW));
        assert_eq!(count_placeholders(&templates.find_by_search_term), 3);
    }

    #[test]
    fn test_default_templates_fit_every_dialect() {
        let templates = QueryTemplateSet::default();
        let catalog = DialectCatalog::default();
        for name in catalog.names() {
            let dialect = catalog.lookup(&name).unwrap();
            templates
                .validate_for(&dialect)
                .unwrap_or_else(|e| panic!("{} rejected the defaults: {}", name, e));
        }
        for (name, sql) in templates.entries() {
            assert!(!sql.to_uppercase().contains("ILIKE"), "{} uses ILIKE", name);
            assert!(!sql.contains('"'), "{} quotes identifiers", name);
        }
    }

    #[test]
    fn test_wrong_placeholder_count_rejected() {
        let templates = QueryTemplateSet {
            find_by_beneficiary_form: "SELECT id FROM p WHERE username = ? AND phone = ?".to_string(),
            ..Default::default()
        };
        let err = templates.validate().unwrap_err();
        assert!(matches!(err, DirectoryError::Configuration { .. }));
        assert!(err.to_string().contains("find_by_beneficiary_form"));
    }

    #[test]
    fn test_count_with_placeholder_rejected() {
        let templates = QueryTemplateSet {
            count: "SELECT COUNT(*) FROM p WHERE active = ?".to_string(),
            ..Default::default()
        };
        assert!(templates.validate().is_err());
    }

    #[test]
    fn test_search_needs_a_placeholder() {
        let templates = QueryTemplateSet {
            find_by_search_term: "SELECT id FROM p".to_string(),
            ..Default::default()
        };
        assert!(templates.validate().is_err());

        let templates = QueryTemplateSet {
            find_by_search_term: "SELECT id FROM p WHERE username LIKE ?".to_string(),
            ..Default::default()
        };
        assert!(templates.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let templates: QueryTemplateSet =
            serde_json::from_str(r#"{"count": "SELECT COUNT(*) FROM res_partner"}"#).unwrap();
        assert_eq!(templates.count, "SELECT COUNT(*) FROM res_partner");
        assert_eq!(templates.list_all, QueryTemplateSet::default().list_all);
    }

    async fn memory_pool(manager: &PoolManager) -> Arc<ActivePool> {
        let settings = PoolSettings {
            url: "sqlite::memory:".to_string(),
            user: None,
            password: None,
            pool_name: "Memory".to_string(),
            options: PoolOptions {
                min_idle: Some(0),
                max_size: Some(1),
                ..Default::default()
            },
        };
        manager
            .configure(&settings, &DialectDescriptor::sqlite())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_registry_rejects_write_template() {
        let manager = PoolManager::new();
        let registry = SnapshotRegistry::new();
        let templates = QueryTemplateSet {
            find_by_id: "DELETE FROM spp_partner_oidc WHERE id = ?".to_string(),
            ..Default::default()
        };
        let err = registry
            .publish(
                "openspp",
                memory_pool(&manager).await,
                templates,
                Arc::new(DialectDescriptor::sqlite()),
                CredentialPolicy::Detect,
            )
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Configuration { .. }));
        assert!(registry.snapshot("openspp").is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_rejects_pool_of_other_driver() {
        let manager = PoolManager::new();
        let registry = SnapshotRegistry::new();
        let err = registry
            .publish(
                "openspp",
                memory_pool(&manager).await,
                QueryTemplateSet::default(),
                Arc::new(DialectDescriptor::postgres()),
                CredentialPolicy::Detect,
            )
            .unwrap_err();
        assert!(err.to_string().contains("expects"));
        assert!(registry.snapshot("openspp").is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_swaps_whole_snapshot() {
        let manager = PoolManager::new();
        let registry = SnapshotRegistry::new();
        let dialect = Arc::new(DialectDescriptor::sqlite());
        let first = registry
            .publish(
                "openspp",
                memory_pool(&manager).await,
                QueryTemplateSet::default(),
                Arc::clone(&dialect),
                CredentialPolicy::Detect,
            )
            .unwrap();

        let held = registry.snapshot("openspp").unwrap();
        let second = registry
            .publish(
                "openspp",
                memory_pool(&manager).await,
                QueryTemplateSet::for_view("res_partner_view"),
                dialect,
                CredentialPolicy::Detect,
            )
            .unwrap();

        assert!(second.version > first.version);
        // A reader holding the old snapshot keeps its templates and its pool
        assert!(held.templates.count.contains(DEFAULT_VIEW));
        assert_eq!(held.pool.generation(), 1);
        let current = registry.snapshot("openspp").unwrap();
        assert!(current.templates.count.contains("res_partner_view"));
        assert_eq!(current.pool.generation(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_failed_reconfigure_keeps_previous() {
        let manager = PoolManager::new();
        let registry = SnapshotRegistry::new();
        let dialect = Arc::new(DialectDescriptor::sqlite());
        registry
            .publish(
                "openspp",
                memory_pool(&manager).await,
                QueryTemplateSet::default(),
                Arc::clone(&dialect),
                CredentialPolicy::Detect,
            )
            .unwrap();

        let broken = QueryTemplateSet {
            find_by_username: "SELECT id FROM p".to_string(),
            ..Default::default()
        };
        let pool = memory_pool(&manager).await;
        assert!(
            registry
                .publish("openspp", pool, broken, dialect, CredentialPolicy::Detect)
                .is_err()
        );
        let current = registry.snapshot("openspp").unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.pool.generation(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_remove() {
        let manager = PoolManager::new();
        let registry = SnapshotRegistry::new();
        registry
            .publish(
                "openspp",
                memory_pool(&manager).await,
                QueryTemplateSet::default(),
                Arc::new(DialectDescriptor::sqlite()),
                CredentialPolicy::Detect,
            )
            .unwrap();
        assert!(registry.remove("openspp").is_some());
        assert!(registry.snapshot("openspp").is_none());
        manager.shutdown().await;
    }
}
