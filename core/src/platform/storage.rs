//! Durable key-value slots
//!
//! Session state lives here rather than in the diary database so that it
//! survives a database wipe or restore.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Slots persisted as a JSON object in a single file
pub struct FileKeyValueStore {
    path: PathBuf,
    /// Guards read-modify-write of the file
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            path: app_data_dir.join("session.json"),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Generic(format!("Failed to parse session slots: {}", e)))
    }

    async fn save(&self, slots: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(slots)?;

        // Write then rename so a crash never leaves a truncated file
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut slots = self.load().await?;
        slots.insert(key.to_string(), value.to_string());
        self.save(&slots).await?;
        tracing::debug!("Stored slot: {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut slots = self.load().await?;
        if slots.remove(key).is_some() {
            self.save(&slots).await?;
            tracing::debug!("Removed slot: {}", key);
        }
        Ok(())
    }
}

/// Process-local slots
#[derive(Default)]
pub struct MemoryKeyValueStore {
    slots: std::sync::Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.slots().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.slots().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_slots_persist_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = FileKeyValueStore::new(temp_dir.path().to_path_buf());
            store.set("google_access_token", "abc").await.unwrap();
            store.set("google_auto_backup", "true").await.unwrap();
        }

        let store = FileKeyValueStore::new(temp_dir.path().to_path_buf());
        assert_eq!(
            store.get("google_access_token").await.unwrap(),
            Some("abc".to_string())
        );

        store.remove("google_access_token").await.unwrap();
        assert_eq!(store.get("google_access_token").await.unwrap(), None);
        assert_eq!(
            store.get("google_auto_backup").await.unwrap(),
            Some("true".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp_dir.path().join("nested"));

        assert_eq!(store.get("anything").await.unwrap(), None);
        store.remove("anything").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_slots() {
        let store = MemoryKeyValueStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
