//! Journal service
//!
//! Diary and entry operations over the repository, plus the advisory
//! edit window callers check before updating or deleting an entry.

use crate::config::entry_edit_window;
use crate::database::{Block, CreateDiaryRequest, Diary, Entry, Repository, UpdateEntryRequest};
use crate::error::Result;
use chrono::{DateTime, Utc};

/// Service for diaries and their entries
#[derive(Clone)]
pub struct JournalService {
    repo: Repository,
}

impl JournalService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create a new diary
    pub async fn create_diary(&self, req: CreateDiaryRequest) -> Result<Diary> {
        tracing::info!("Creating new diary: {}", req.title);

        let diary = self.repo.create_diary(req).await?;

        tracing::info!("Diary created successfully: {}", diary.id);
        Ok(diary)
    }

    pub async fn get_diary(&self, id: i64) -> Result<Option<Diary>> {
        self.repo.get_diary(id).await
    }

    /// List all diaries, oldest first
    pub async fn list_diaries(&self) -> Result<Vec<Diary>> {
        self.repo.list_diaries().await
    }

    /// Write blocks to a diary's page for `date`, appending if the day
    /// already has an entry.
    pub async fn write_entry(&self, diary_id: i64, date: &str, blocks: Vec<Block>) -> Result<Entry> {
        tracing::debug!("Writing {} blocks to diary {} on {}", blocks.len(), diary_id, date);
        self.repo.create_or_append_entry(diary_id, date, blocks).await
    }

    pub async fn list_entries(&self, diary_id: i64) -> Result<Vec<Entry>> {
        self.repo.list_entries_for_diary(diary_id).await
    }

    pub async fn get_entry(&self, diary_id: i64, date: &str) -> Result<Option<Entry>> {
        self.repo.get_entry(diary_id, date).await
    }

    /// Update an entry. The edit window is not enforced here.
    pub async fn update_entry(&self, id: i64, req: UpdateEntryRequest) -> Result<u64> {
        tracing::debug!("Updating entry: {}", id);
        self.repo.update_entry(id, req).await
    }

    /// Delete an entry. The edit window is not enforced here.
    pub async fn delete_entry(&self, id: i64) -> Result<()> {
        tracing::info!("Deleting entry: {}", id);
        self.repo.delete_entry(id).await
    }
}

/// Whether an entry is still inside its edit window right now.
pub fn can_modify_entry(entry: &Entry) -> bool {
    can_modify_entry_at(entry, Utc::now())
}

/// Whether an entry is inside its edit window at `now`. The boundary
/// instant itself still counts as inside.
pub fn can_modify_entry_at(entry: &Entry, now: DateTime<Utc>) -> bool {
    now - entry.created_at <= entry_edit_window()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{diary_request, memory_store};
    use chrono::Duration;

    async fn create_test_service() -> JournalService {
        JournalService::new(memory_store().await.repository())
    }

    fn entry_created_at(created_at: DateTime<Utc>) -> Entry {
        Entry {
            id: 1,
            diary_id: 1,
            date: "2024-01-01".to_string(),
            blocks: vec![Block::text("hello")],
            created_at,
            updated_at: None,
        }
    }

    #[test]
    fn test_edit_window_boundaries() {
        let created = Utc::now();
        let entry = entry_created_at(created);

        let before = created + Duration::minutes(14) + Duration::seconds(59);
        let at = created + Duration::minutes(15);
        let after = created + Duration::minutes(15) + Duration::seconds(1);
        let well_after = created + Duration::minutes(15) + Duration::seconds(60);

        assert!(can_modify_entry_at(&entry, before));
        assert!(can_modify_entry_at(&entry, at));
        assert!(!can_modify_entry_at(&entry, after));
        assert!(!can_modify_entry_at(&entry, well_after));
    }

    #[test]
    fn test_fresh_entry_is_editable() {
        let entry = entry_created_at(Utc::now());
        assert!(can_modify_entry(&entry));

        let old = entry_created_at(Utc::now() - Duration::hours(1));
        assert!(!can_modify_entry(&old));
    }

    #[tokio::test]
    async fn test_write_entry_accumulates() {
        let service = create_test_service().await;
        let diary = service.create_diary(diary_request("Spanish")).await.unwrap();

        service
            .write_entry(diary.id, "2024-01-01", vec![Block::text("hola")])
            .await
            .unwrap();
        let entry = service
            .write_entry(diary.id, "2024-01-01", vec![Block::text("adios")])
            .await
            .unwrap();

        assert_eq!(entry.blocks, vec![Block::text("hola"), Block::text("adios")]);
        assert_eq!(service.list_entries(diary.id).await.unwrap().len(), 1);
        assert!(can_modify_entry(&entry));
    }
}
