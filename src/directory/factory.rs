//! Per-deployment directories.
//!
//! The factory owns one [`PoolManager`] per deployment and a snapshot
//! registry shared by all of them. Configuring a deployment validates its
//! dialect and templates before any connection is opened, then opens the new
//! pool and publishes it together with the templates as one snapshot.
//! Configure, remove and shutdown run one at a time.

use crate::config::{DeploymentConfig, PROVIDER_ID};
use crate::db::{DialectCatalog, PoolManager};
use crate::directory::Directory;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::SnapshotRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Builds and tracks the directory of every configured deployment.
#[derive(Debug)]
pub struct DirectoryFactory {
    provider_id: String,
    catalog: DialectCatalog,
    registry: Arc<SnapshotRegistry>,
    pools: RwLock<HashMap<String, Arc<PoolManager>>>,
    /// Held across every change to `pools` and `registry`.
    configure_lock: Mutex<()>,
}

impl Default for DirectoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryFactory {
    /// A factory with the built-in dialects.
    pub fn new() -> Self {
        Self::with_catalog(DialectCatalog::default())
    }

    /// A factory selecting dialects from `catalog`.
    pub fn with_catalog(catalog: DialectCatalog) -> Self {
        Self {
            provider_id: PROVIDER_ID.to_string(),
            catalog,
            registry: Arc::new(SnapshotRegistry::new()),
            pools: RwLock::new(HashMap::new()),
            configure_lock: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &DialectCatalog {
        &self.catalog
    }

    /// Apply a deployment configuration.
    ///
    /// On error the deployment keeps whatever pool and templates it had.
    pub async fn configure(&self, config: &DeploymentConfig) -> DirectoryResult<Directory> {
        config.validate()?;
        let dialect = self.catalog.lookup(&config.dialect)?;
        config.templates.validate_for(&dialect)?;

        let _guard = self.configure_lock.lock().await;

        let (manager, created) = {
            let mut pools = self.pools.write().await;
            match pools.get(&config.id) {
                Some(manager) => (Arc::clone(manager), false),
                None => {
                    let manager = Arc::new(PoolManager::new());
                    pools.insert(config.id.clone(), Arc::clone(&manager));
                    (manager, true)
                }
            }
        };

        let settings = config.pool_settings(&self.provider_id);
        let pool = match manager.configure(&settings, &dialect).await {
            Ok(pool) => pool,
            Err(e) => {
                if created {
                    self.pools.write().await.remove(&config.id);
                    manager.shutdown().await;
                }
                warn!(deployment = %config.id, error = %e, "Rejected deployment configuration");
                return Err(e);
            }
        };

        // Publishing drops the previous snapshot, which lets the manager
        // close the pool it superseded once in-flight readers finish.
        self.registry.publish(
            &config.id,
            pool,
            config.templates.clone(),
            dialect,
            config.hashing,
        )?;

        info!(
            deployment = %config.id,
            dialect = %config.dialect,
            hashing = %config.hashing,
            "Deployment configured"
        );
        Ok(Directory::new(config.id.as_str(), Arc::clone(&self.registry)))
    }

    /// The directory of a configured deployment.
    pub async fn directory(&self, deployment_id: &str) -> DirectoryResult<Directory> {
        if !self.pools.read().await.contains_key(deployment_id) {
            return Err(DirectoryError::not_configured(deployment_id));
        }
        Ok(Directory::new(deployment_id, Arc::clone(&self.registry)))
    }

    /// Ids of every configured deployment.
    pub async fn deployments(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pools.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop a deployment and close its pool. Returns whether it existed.
    pub async fn remove(&self, deployment_id: &str) -> bool {
        let _guard = self.configure_lock.lock().await;
        let manager = self.pools.write().await.remove(deployment_id);
        self.registry.remove(deployment_id);
        match manager {
            Some(manager) => {
                manager.shutdown().await;
                info!(deployment = %deployment_id, "Deployment removed");
                true
            }
            None => false,
        }
    }

    /// Close every deployment's pool.
    pub async fn shutdown(&self) {
        let _guard = self.configure_lock.lock().await;
        let managers: Vec<(String, Arc<PoolManager>)> =
            self.pools.write().await.drain().collect();
        for (id, manager) in managers {
            self.registry.remove(&id);
            manager.shutdown().await;
        }
        info!("All deployments shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    fn memory_deployment(id: &str) -> DeploymentConfig {
        let mut config = DeploymentConfig::new(id, "sqlite::memory:");
        config.dialect = "SQLite 3".to_string();
        config.pool = PoolOptions {
            min_idle: Some(0),
            max_size: Some(1),
            ..Default::default()
        };
        config
    }

    #[tokio::test]
    async fn test_configure_and_lookup_directory() {
        let factory = DirectoryFactory::new();
        let directory = factory.configure(&memory_deployment("alpha")).await.unwrap();
        assert_eq!(directory.deployment_id(), "alpha");
        assert!(factory.directory("alpha").await.is_ok());
        assert_eq!(factory.deployments().await, vec!["alpha".to_string()]);
        factory.shutdown().await;
        assert!(factory.directory("alpha").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_dialect_rejected_before_connecting() {
        let factory = DirectoryFactory::new();
        let mut config = memory_deployment("alpha");
        config.dialect = "Oracle 19c".to_string();
        let err = factory.configure(&config).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Configuration { .. }));
        assert!(factory.deployments().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_first_configure_leaves_nothing_behind() {
        let factory = DirectoryFactory::new();
        let mut config = memory_deployment("alpha");
        config.url = "sqlite:/nonexistent/dir/partners.db".to_string();
        assert!(factory.configure(&config).await.is_err());
        assert!(factory.directory("alpha").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_first_configures_keep_the_working_one() {
        let factory = DirectoryFactory::new();
        let good = memory_deployment("alpha");
        let mut broken = memory_deployment("alpha");
        broken.url = "sqlite:/nonexistent/dir/partners.db".to_string();

        let (failed, succeeded) = tokio::join!(factory.configure(&broken), factory.configure(&good));
        assert!(failed.is_err());
        let directory = succeeded.unwrap();

        // Whichever ran first, the working pool is the one left serving
        assert_eq!(factory.deployments().await, vec!["alpha".to_string()]);
        assert!(factory.directory("alpha").await.is_ok());
        assert_eq!(directory.deployment_id(), "alpha");
        let snapshot = factory.registry.snapshot("alpha").unwrap();
        assert!(!snapshot.pool.pool().is_closed());
        let one = snapshot.executor().fetch_integer("SELECT 1", &[]).await.unwrap();
        assert_eq!(one, Some(1));

        factory.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_deployment() {
        let factory = DirectoryFactory::new();
        factory.configure(&memory_deployment("alpha")).await.unwrap();
        assert!(factory.remove("alpha").await);
        assert!(!factory.remove("alpha").await);
    }
}
