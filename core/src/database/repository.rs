//! Repository layer for database operations
//!
//! CRUD operations for diaries and entries, plus the bulk snapshot and
//! replace-all used by backup and restore.

use super::models::*;
use crate::error::{AppError, Result};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::types::Json;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    /// Serializes entry writes so lookup-then-insert cannot race.
    entry_writes: Arc<Mutex<()>>,
}

impl Repository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            entry_writes: Arc::new(Mutex::new(())),
        }
    }

    /// Create a new diary
    pub async fn create_diary(&self, req: CreateDiaryRequest) -> Result<Diary> {
        let now = Utc::now();

        let diary = sqlx::query_as::<_, Diary>(
            r#"
            INSERT INTO diaries (title, width, height, color, font_color, font_family, font_size, bold, italic, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&req.title)
        .bind(req.width)
        .bind(req.height)
        .bind(&req.color)
        .bind(&req.font_color)
        .bind(&req.font_family)
        .bind(req.font_size)
        .bind(req.bold)
        .bind(req.italic)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created diary: {}", diary.id);
        Ok(diary)
    }

    /// Get a diary by ID
    pub async fn get_diary(&self, id: i64) -> Result<Option<Diary>> {
        let diary = sqlx::query_as::<_, Diary>("SELECT * FROM diaries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(diary)
    }

    /// List all diaries, oldest first
    pub async fn list_diaries(&self) -> Result<Vec<Diary>> {
        let diaries =
            sqlx::query_as::<_, Diary>("SELECT * FROM diaries ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(diaries)
    }

    /// Add blocks to the entry for `(diary_id, date)`, creating it if needed.
    ///
    /// A second write to the same day appends after the existing blocks and
    /// stamps `updated_at`; it never replaces them.
    pub async fn create_or_append_entry(
        &self,
        diary_id: i64,
        date: &str,
        blocks: Vec<Block>,
    ) -> Result<Entry> {
        validate_date(date)?;

        let _write = self.entry_writes.lock().await;
        let mut tx = self.pool.begin().await?;

        let diary_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM diaries WHERE id = ?")
            .bind(diary_id)
            .fetch_optional(&mut *tx)
            .await?;

        if diary_exists.is_none() {
            return Err(AppError::DiaryNotFound(diary_id));
        }

        let existing = find_entry(&mut *tx, diary_id, date).await?;

        let entry = match existing {
            Some(mut entry) => {
                entry.blocks.extend(blocks);

                let updated = sqlx::query_as::<_, Entry>(
                    "UPDATE entries SET blocks = ?, updated_at = ? WHERE id = ? RETURNING *",
                )
                .bind(Json(&entry.blocks))
                .bind(Utc::now())
                .bind(entry.id)
                .fetch_one(&mut *tx)
                .await?;

                tracing::debug!("Appended to entry {} ({} blocks)", updated.id, updated.blocks.len());
                updated
            }
            None => {
                let created = sqlx::query_as::<_, Entry>(
                    r#"
                    INSERT INTO entries (diary_id, date, blocks, created_at)
                    VALUES (?, ?, ?, ?)
                    RETURNING *
                    "#,
                )
                .bind(diary_id)
                .bind(date)
                .bind(Json(&blocks))
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?;

                tracing::debug!("Created entry {} for diary {} on {}", created.id, diary_id, date);
                created
            }
        };

        tx.commit().await?;
        Ok(entry)
    }

    /// Entries of a diary, in no particular order
    pub async fn list_entries_for_diary(&self, diary_id: i64) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>("SELECT * FROM entries WHERE diary_id = ?")
            .bind(diary_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// The entry for a diary on a given date
    pub async fn get_entry(&self, diary_id: i64, date: &str) -> Result<Option<Entry>> {
        let mut conn = self.pool.acquire().await?;
        find_entry(&mut *conn, diary_id, date).await
    }

    pub async fn get_entry_by_id(&self, id: i64) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    /// Update an entry, returning the number of rows changed.
    ///
    /// Moving an entry keeps one entry per diary and day: the target diary
    /// must exist and must not already hold an entry on the target date.
    pub async fn update_entry(&self, id: i64, req: UpdateEntryRequest) -> Result<u64> {
        if let Some(date) = &req.date {
            validate_date(date)?;
        }

        // Build dynamic update query
        let mut query = "UPDATE entries SET updated_at = ?".to_string();

        if req.diary_id.is_some() {
            query.push_str(", diary_id = ?");
        }
        if req.date.is_some() {
            query.push_str(", date = ?");
        }
        if req.blocks.is_some() {
            query.push_str(", blocks = ?");
        }
        query.push_str(" WHERE id = ?");

        let _write = self.entry_writes.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Entry>("SELECT * FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(current) = current else {
            return Ok(0);
        };

        if req.diary_id.is_some() || req.date.is_some() {
            let diary_id = req.diary_id.unwrap_or(current.diary_id);
            let date = req.date.as_deref().unwrap_or(&current.date);

            let diary_exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM diaries WHERE id = ?")
                    .bind(diary_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if diary_exists.is_none() {
                return Err(AppError::DiaryNotFound(diary_id));
            }

            if let Some(other) = find_entry(&mut *tx, diary_id, date).await? {
                if other.id != id {
                    return Err(AppError::Validation(format!(
                        "Diary {} already has an entry on {}",
                        diary_id, date
                    )));
                }
            }
        }

        let mut q = sqlx::query(&query).bind(Utc::now());
        if let Some(diary_id) = req.diary_id {
            q = q.bind(diary_id);
        }
        if let Some(date) = &req.date {
            q = q.bind(date);
        }
        if let Some(blocks) = &req.blocks {
            q = q.bind(Json(blocks));
        }

        let rows_affected = q.bind(id).execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        tracing::debug!("Updated entry {} ({} rows)", id, rows_affected);
        Ok(rows_affected)
    }

    /// Delete an entry
    pub async fn delete_entry(&self, id: i64) -> Result<()> {
        let _write = self.entry_writes.lock().await;

        sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Deleted entry: {}", id);
        Ok(())
    }

    pub async fn count_diaries(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM diaries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_entries(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All diaries and entries, read in one transaction
    pub async fn snapshot(&self) -> Result<(Vec<Diary>, Vec<Entry>)> {
        let mut tx = self.pool.begin().await?;

        let diaries = sqlx::query_as::<_, Diary>("SELECT * FROM diaries ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;
        let entries = sqlx::query_as::<_, Entry>("SELECT * FROM entries ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((diaries, entries))
    }

    /// Replace every diary and entry in one transaction.
    ///
    /// Incoming ids are discarded; the store assigns fresh ones and entry
    /// diary references are remapped to them. Any failure rolls back and
    /// leaves the previous contents in place.
    pub async fn replace_all(&self, diaries: &[Diary], entries: &[Entry]) -> Result<()> {
        let _write = self.entry_writes.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entries").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM diaries").execute(&mut *tx).await?;

        let mut diary_ids = HashMap::with_capacity(diaries.len());

        for diary in diaries {
            let new_id = sqlx::query(
                r#"
                INSERT INTO diaries (title, width, height, color, font_color, font_family, font_size, bold, italic, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&diary.title)
            .bind(diary.width)
            .bind(diary.height)
            .bind(&diary.color)
            .bind(&diary.font_color)
            .bind(&diary.font_family)
            .bind(diary.font_size)
            .bind(diary.bold)
            .bind(diary.italic)
            .bind(diary.created_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            diary_ids.insert(diary.id, new_id);
        }

        for entry in entries {
            let diary_id = diary_ids
                .get(&entry.diary_id)
                .copied()
                .ok_or(AppError::DiaryNotFound(entry.diary_id))?;

            sqlx::query(
                r#"
                INSERT INTO entries (diary_id, date, blocks, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(diary_id)
            .bind(&entry.date)
            .bind(Json(&entry.blocks))
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Replaced store contents: {} diaries, {} entries",
            diaries.len(),
            entries.len()
        );
        Ok(())
    }
}

async fn find_entry(conn: &mut SqliteConnection, diary_id: i64, date: &str) -> Result<Option<Entry>> {
    let entry = sqlx::query_as::<_, Entry>(
        "SELECT * FROM entries WHERE diary_id = ? AND date = ? ORDER BY id LIMIT 1",
    )
    .bind(diary_id)
    .bind(date)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(entry)
}

/// `YYYY-MM-DD` naming a real calendar day
pub(crate) fn is_entry_date(date: &str) -> bool {
    date.len() == 10 && NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

fn validate_date(date: &str) -> Result<()> {
    if !is_entry_date(date) {
        return Err(AppError::Validation(format!(
            "Invalid entry date '{}', expected YYYY-MM-DD",
            date
        )));
    }
    Ok(())
}
