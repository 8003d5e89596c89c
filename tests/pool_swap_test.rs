//! Integration tests for hot pool replacement.
//!
//! Tests verify that:
//! - A successful reconfiguration publishes a new pool and closes the old one
//! - A rejected reconfiguration keeps the previous pool serving
//! - Readers running across repeated reconfigurations never see a failure
//! - Readers never pair one store's templates with another store's pool

use partner_directory::config::{DeploymentConfig, PROVIDER_ID, PoolOptions};
use partner_directory::db::{DialectCatalog, DriverKind, PoolManager, QueryExecutor};
use partner_directory::models::QueryTemplateSet;
use partner_directory::DirectoryFactory;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// A store holding `rows` partners in the default view.
async fn create_store(rows: i64) -> String {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let pool = SqlitePool::connect(&format!("sqlite:{}", db_path)).await.unwrap();
    sqlx::query("CREATE TABLE spp_partner_oidc (id INTEGER PRIMARY KEY, username TEXT, email TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    for id in 1..=rows {
        sqlx::query("INSERT INTO spp_partner_oidc (id, username) VALUES (?, ?)")
            .bind(id)
            .bind(format!("user{}", id))
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;
    db_path
}

fn deployment(db_path: &str) -> DeploymentConfig {
    let mut config = DeploymentConfig::new("swap", format!("sqlite:{}", db_path));
    config.dialect = "SQLite 3".to_string();
    config.pool = PoolOptions {
        min_idle: Some(0),
        max_size: Some(2),
        ..Default::default()
    };
    config.templates = QueryTemplateSet {
        list_all: "SELECT id, username FROM spp_partner_oidc ORDER BY id".to_string(),
        find_by_search_term: "SELECT id, username FROM spp_partner_oidc WHERE username LIKE ?"
            .to_string(),
        ..QueryTemplateSet::default()
    };
    config
}

async fn wait_until_closed(pool: &partner_directory::db::DbPool) -> bool {
    for _ in 0..100 {
        if pool.is_closed() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_reconfigure_swaps_and_retires_pool() {
    let first_path = create_store(2).await;
    let second_path = create_store(3).await;
    let dialect = DialectCatalog::default().lookup("SQLite 3").unwrap();
    let manager = PoolManager::new();

    let first = manager
        .configure(&deployment(&first_path).pool_settings(PROVIDER_ID), &dialect)
        .await
        .unwrap();
    assert_eq!(first.generation(), 1);
    assert!(first.name().starts_with("Openspp"));
    let first_pool = first.pool().clone();
    drop(first);

    let second = manager
        .configure(&deployment(&second_path).pool_settings(PROVIDER_ID), &dialect)
        .await
        .unwrap();
    assert_eq!(second.generation(), 2);
    assert!(Arc::ptr_eq(&second, &manager.acquire().unwrap()));

    let executor = QueryExecutor::new(Arc::clone(&second), Arc::clone(&dialect));
    let count = executor
        .fetch_integer("SELECT COUNT(*) FROM spp_partner_oidc", &[])
        .await
        .unwrap();
    assert_eq!(count, Some(3));
    let populated = executor
        .fetch_boolean("SELECT COUNT(*) > 0 FROM spp_partner_oidc", &[])
        .await
        .unwrap();
    assert_eq!(populated, Some(true));
    assert_eq!(second.pool().driver(), DriverKind::Sqlite);

    assert!(wait_until_closed(&first_pool).await, "superseded pool was never closed");
    assert!(!second.pool().is_closed());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_retired_pool_stays_open_while_captured() {
    let first_path = create_store(2).await;
    let second_path = create_store(3).await;
    let dialect = DialectCatalog::default().lookup("SQLite 3").unwrap();
    let manager = PoolManager::new();

    manager
        .configure(&deployment(&first_path).pool_settings(PROVIDER_ID), &dialect)
        .await
        .unwrap();
    let captured = QueryExecutor::new(manager.acquire().unwrap(), Arc::clone(&dialect));

    manager
        .configure(&deployment(&second_path).pool_settings(PROVIDER_ID), &dialect)
        .await
        .unwrap();

    // The in-flight operation finishes against the store it started on
    tokio::time::sleep(Duration::from_millis(200)).await;
    let count = captured
        .fetch_integer("SELECT COUNT(*) FROM spp_partner_oidc", &[])
        .await
        .unwrap();
    assert_eq!(count, Some(2));

    let old_pool = captured.pool().pool().clone();
    drop(captured);
    assert!(wait_until_closed(&old_pool).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_reconfigure_keeps_previous_pool() {
    let path = create_store(2).await;
    let factory = DirectoryFactory::new();
    let directory = factory.configure(&deployment(&path)).await.unwrap();
    assert_eq!(directory.count().await, 2);

    let mut broken = deployment(&path);
    broken.url = "sqlite:/nonexistent/dir/partners.db".to_string();
    assert!(factory.configure(&broken).await.is_err());
    assert_eq!(directory.count().await, 2);

    let mut bad_template = deployment(&path);
    bad_template.templates.count = "DELETE FROM spp_partner_oidc".to_string();
    assert!(factory.configure(&bad_template).await.is_err());
    assert_eq!(directory.count().await, 2);

    factory.shutdown().await;
}

#[tokio::test]
async fn test_readers_survive_repeated_reconfiguration() {
    let path = create_store(5).await;
    let factory = Arc::new(DirectoryFactory::new());
    let directory = factory.configure(&deployment(&path)).await.unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let directory = directory.clone();
        readers.push(tokio::spawn(async move {
            let mut counts = Vec::new();
            for _ in 0..20 {
                counts.push(directory.count().await);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            counts
        }));
    }

    for _ in 0..5 {
        factory.configure(&deployment(&path)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for reader in readers {
        let counts = reader.await.unwrap();
        assert!(counts.iter().all(|&c| c == 5), "reader saw {:?}", counts);
    }

    factory.shutdown().await;
}

/// A store whose partners live in a table called `table`.
async fn create_named_store(table: &str, rows: i64) -> String {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let pool = SqlitePool::connect(&format!("sqlite:{}", db_path)).await.unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {} (
            id INTEGER PRIMARY KEY, username TEXT, email TEXT, phone TEXT,
            first_name TEXT, last_name TEXT, full_name TEXT, active_group TEXT
        )",
        table
    ))
    .execute(&pool)
    .await
    .unwrap();
    for id in 1..=rows {
        sqlx::query(&format!(
            "INSERT INTO {} (id, username, full_name) VALUES (?, ?, ?)",
            table
        ))
        .bind(id)
        .bind(format!("user{}", id))
        .bind(format!("User {}", id))
        .execute(&pool)
        .await
        .unwrap();
    }
    pool.close().await;
    db_path
}

fn named_deployment(db_path: &str, table: &str) -> DeploymentConfig {
    let mut config = deployment(db_path);
    config.templates = QueryTemplateSet::for_view(table);
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_mix_stores_across_reconfiguration() {
    let a_path = create_named_store("store_a", 3).await;
    let b_path = create_named_store("store_b", 4).await;
    let store_a = named_deployment(&a_path, "store_a");
    let store_b = named_deployment(&b_path, "store_b");

    let factory = Arc::new(DirectoryFactory::new());
    let directory = factory.configure(&store_a).await.unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let directory = directory.clone();
        readers.push(tokio::spawn(async move {
            let mut misses = 0;
            let mut counts = Vec::new();
            for _ in 0..50 {
                match directory.find_by_username("user1").await {
                    Some(record) if record.username() == Some("user1") => {}
                    _ => misses += 1,
                }
                counts.push(directory.count().await);
                tokio::task::yield_now().await;
            }
            (misses, counts)
        }));
    }

    for round in 0..10 {
        let next = if round % 2 == 0 { &store_b } else { &store_a };
        factory.configure(next).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for reader in readers {
        let (misses, counts) = reader.await.unwrap();
        assert_eq!(misses, 0, "a lookup ran one store's template on the other store");
        assert!(counts.iter().all(|&c| c == 3 || c == 4), "reader saw {:?}", counts);
    }

    factory.shutdown().await;
}
