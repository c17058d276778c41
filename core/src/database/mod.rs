//! Database module
//!
//! This module provides all database functionality including:
//! - Versioned schema and record upgrades
//! - Model definitions
//! - Repository layer for CRUD operations
//!
//! `SchemaStore` is the only way to obtain a `Repository`, so nothing
//! touches records before the store has reached the current version.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use schema::{initialize_database, latest_version, Migration, RecordUpgrade, MIGRATIONS};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Build connection options shared by migration and application connections.
fn connect_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
}

/// Embedded store opened at a known schema version
#[derive(Clone)]
pub struct SchemaStore {
    pool: SqlitePool,
    /// Shared so every caller goes through the same entry-write lock
    repo: Repository,
    version: i64,
    applied: Vec<i64>,
}

impl SchemaStore {
    /// Open (or create) the store at `db_path`, upgrading to the latest version.
    ///
    /// Migrations run on a dedicated single-connection pool that is closed
    /// before the application pool is created, so every pooled connection
    /// sees the final schema.
    pub async fn open(db_path: &Path) -> Result<Self> {
        tracing::info!("Opening diary store at: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let migration_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options(db_path))
            .await?;

        let upgraded = Self::attach(migration_pool.clone()).await;
        migration_pool.close().await;
        let upgraded = upgraded?;

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options(db_path))
            .await?;

        tracing::info!("Diary store ready at version {}", upgraded.version);

        Ok(Self {
            repo: Repository::new(pool.clone()),
            pool,
            version: upgraded.version,
            applied: upgraded.applied,
        })
    }

    /// Private in-memory store on a single long-lived connection.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::attach(pool).await
    }

    /// Upgrade a caller-supplied pool to the latest version.
    pub async fn attach(pool: SqlitePool) -> Result<Self> {
        Self::attach_at(pool, latest_version()).await
    }

    /// Upgrade a caller-supplied pool up to `target`.
    pub async fn attach_at(pool: SqlitePool, target: i64) -> Result<Self> {
        let applied = schema::run_migrations(&pool, MIGRATIONS, target).await?;
        let version = schema::current_version(&pool).await?;

        Ok(Self {
            repo: Repository::new(pool.clone()),
            pool,
            version,
            applied,
        })
    }

    /// Schema version the store is at
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Versions upgraded while opening this handle
    pub fn applied_versions(&self) -> &[i64] {
        &self.applied
    }

    /// Record repository over the current-version shape
    pub fn repository(&self) -> Repository {
        self.repo.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
