//! Database schema and migrations
//!
//! Each schema version declares its shape as SQL and, optionally, a
//! record upgrade that rewrites existing rows from the previous shape.
//! A version runs inside a single transaction together with the write of
//! its version marker, so a failed upgrade leaves the store at the
//! previous version.

use super::models::{Block, LegacyEntry};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::types::Json;
use sqlx::{sqlite::SqlitePool, Row};

/// Rows fetched per round trip while upgrading records.
const UPGRADE_BATCH_SIZE: i64 = 200;

/// Per-record rewrite attached to a schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpgrade {
    /// String `content` becomes a block sequence.
    EntryContentToBlocks,
    /// Entries without `created_at` are stamped with the upgrade time.
    StampEntryCreatedAt,
}

/// One schema version
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    /// Shape changes applied before records are upgraded
    pub sql: &'static str,
    pub upgrade: Option<RecordUpgrade>,
    /// Shape changes applied after records are upgraded
    pub cleanup: &'static str,
}

/// Every schema version this build knows about, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("migrations/001_initial_schema.sql"),
        upgrade: None,
        cleanup: "",
    },
    Migration {
        version: 2,
        name: "entry_blocks",
        sql: include_str!("migrations/002_entry_blocks.sql"),
        upgrade: Some(RecordUpgrade::EntryContentToBlocks),
        cleanup: include_str!("migrations/002_entry_blocks_cleanup.sql"),
    },
    Migration {
        version: 3,
        name: "entry_timestamps",
        sql: include_str!("migrations/003_entry_timestamps.sql"),
        upgrade: Some(RecordUpgrade::StampEntryCreatedAt),
        cleanup: "",
    },
];

/// Latest schema version shipped with this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Initialize database with schema, upgrading to the latest version.
///
/// Returns the versions applied by this call, in order.
pub async fn initialize_database(pool: &SqlitePool) -> Result<Vec<i64>> {
    run_migrations(pool, MIGRATIONS, latest_version()).await
}

/// Bring the store up to `target` using `migrations`.
pub async fn run_migrations(
    pool: &SqlitePool,
    migrations: &[Migration],
    target: i64,
) -> Result<Vec<i64>> {
    tracing::info!("Initializing database schema");

    check_migration_order(migrations)?;

    let latest = migrations.last().map(|m| m.version).unwrap_or(0);
    if target > latest {
        return Err(AppError::SchemaUpgrade {
            version: target,
            reason: format!("unknown schema version, latest known is {}", latest),
        });
    }

    // WAL keeps readers off the writer during upgrades and imports
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current = current_version(pool).await?;

    tracing::info!("Current database version: {}", current);

    if current > latest {
        return Err(AppError::SchemaUpgrade {
            version: current,
            reason: format!(
                "store was written by a newer release (version {}, this build knows {})",
                current, latest
            ),
        });
    }

    let mut applied = Vec::new();

    for migration in migrations {
        if migration.version <= current || migration.version > target {
            continue;
        }

        tracing::info!(
            "Applying migration version {} ({})",
            migration.version,
            migration.name
        );

        apply_migration(pool, migration)
            .await
            .map_err(|e| {
                tracing::error!("Migration version {} failed: {}", migration.version, e);
                match e {
                    AppError::SchemaUpgrade { .. } => e,
                    other => AppError::SchemaUpgrade {
                        version: migration.version,
                        reason: other.to_string(),
                    },
                }
            })?;

        tracing::info!("Migration version {} applied successfully", migration.version);
        applied.push(migration.version);
    }

    tracing::info!("Database initialization complete");
    Ok(applied)
}

/// Version recorded in the marker table, 0 for a fresh store
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(pool)
        .await?
        .get(0);

    Ok(version)
}

fn check_migration_order(migrations: &[Migration]) -> Result<()> {
    for (index, migration) in migrations.iter().enumerate() {
        let expected = index as i64 + 1;
        if migration.version != expected {
            return Err(AppError::SchemaUpgrade {
                version: migration.version,
                reason: format!(
                    "migrations out of order: expected version {} at position {}",
                    expected, index
                ),
            });
        }
    }
    Ok(())
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;

    execute_script(&mut *tx, migration.sql).await?;

    if let Some(upgrade) = migration.upgrade {
        let upgraded = run_record_upgrade(&mut *tx, upgrade).await?;
        tracing::info!("Upgraded {} records ({:?})", upgraded, upgrade);
    }

    execute_script(&mut *tx, migration.cleanup).await?;

    sqlx::query("INSERT INTO migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

async fn execute_script(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Walk the affected table in id order, one batch at a time.
async fn run_record_upgrade(conn: &mut SqliteConnection, upgrade: RecordUpgrade) -> Result<u64> {
    let upgrade_time = Utc::now();
    let mut last_id = 0_i64;
    let mut count = 0_u64;

    loop {
        let processed = match upgrade {
            RecordUpgrade::EntryContentToBlocks => {
                let batch = sqlx::query_as::<_, LegacyEntry>(
                    "SELECT id, content FROM entries WHERE id > ? ORDER BY id LIMIT ?",
                )
                .bind(last_id)
                .bind(UPGRADE_BATCH_SIZE)
                .fetch_all(&mut *conn)
                .await?;

                for legacy in &batch {
                    let blocks = content_to_blocks(legacy.content.as_deref());
                    sqlx::query("UPDATE entries SET blocks = ? WHERE id = ?")
                        .bind(Json(&blocks))
                        .bind(legacy.id)
                        .execute(&mut *conn)
                        .await?;
                    tracing::debug!("Converted entry {} to {} blocks", legacy.id, blocks.len());
                }

                batch.last().map(|e| (e.id, batch.len()))
            }
            RecordUpgrade::StampEntryCreatedAt => {
                let batch: Vec<(i64, Option<DateTime<Utc>>)> = sqlx::query_as(
                    "SELECT id, created_at FROM entries WHERE id > ? ORDER BY id LIMIT ?",
                )
                .bind(last_id)
                .bind(UPGRADE_BATCH_SIZE)
                .fetch_all(&mut *conn)
                .await?;

                for (id, created_at) in &batch {
                    if created_at.is_some() {
                        continue;
                    }
                    sqlx::query("UPDATE entries SET created_at = ? WHERE id = ?")
                        .bind(stamp_created_at(*created_at, upgrade_time))
                        .bind(*id)
                        .execute(&mut *conn)
                        .await?;
                }

                batch.last().map(|(id, _)| (*id, batch.len()))
            }
        };

        match processed {
            Some((id, len)) => {
                last_id = id;
                count += len as u64;
                if (len as i64) < UPGRADE_BATCH_SIZE {
                    break;
                }
            }
            None => break,
        }
    }

    Ok(count)
}

/// Legacy string content as a block sequence. Blank content has no blocks.
pub fn content_to_blocks(content: Option<&str>) -> Vec<Block> {
    match content {
        Some(text) if !text.trim().is_empty() => vec![Block::text(text)],
        _ => Vec::new(),
    }
}

/// Creation time for an upgraded entry; missing values get the upgrade time.
pub fn stamp_created_at(existing: Option<DateTime<Utc>>, upgrade_time: DateTime<Utc>) -> DateTime<Utc> {
    existing.unwrap_or(upgrade_time)
}
