//! Backup service
//!
//! Serializes every diary and entry into a portable JSON document and
//! restores from one. Import is a destructive replace: the document is
//! authoritative and local data not in it is lost.

use crate::config::{BACKUP_FILE_PREFIX, BACKUP_FORMAT_VERSION};
use crate::database::repository::is_entry_date;
use crate::database::{Block, Diary, Entry, Repository};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Portable snapshot of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: String,
    pub timestamp: String,
    pub diaries: Vec<Diary>,
    pub entries: Vec<Entry>,
}

/// Record counts and approximate export size
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub diaries: i64,
    pub entries: i64,
    pub database_size: String,
}

/// Diary as read from a document; the id is only used to remap entries.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingDiary {
    id: Option<i64>,
    title: String,
    width: f64,
    height: f64,
    color: String,
    font_color: String,
    font_family: String,
    font_size: f64,
    bold: bool,
    italic: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingEntry {
    diary_id: i64,
    date: String,
    blocks: Vec<Block>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Backup service
#[derive(Clone)]
pub struct BackupService {
    repo: Repository,
}

impl BackupService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Snapshot all diaries and entries, tagged with format version and time
    pub async fn export(&self) -> Result<BackupDocument> {
        let (diaries, entries) = self.repo.snapshot().await?;

        tracing::debug!(
            "Exporting {} diaries and {} entries",
            diaries.len(),
            entries.len()
        );

        Ok(BackupDocument {
            version: BACKUP_FORMAT_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            diaries,
            entries,
        })
    }

    /// Export as pretty-printed JSON
    pub async fn export_json(&self) -> Result<String> {
        let document = self.export().await?;
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Structural check of a parsed document against the current entry shape
    pub fn validate(document: &Value) -> bool {
        check_document(document).is_ok()
    }

    /// Replace the store contents with a backup document.
    pub async fn import(&self, json: &str) -> Result<()> {
        tracing::info!("Importing backup ({} bytes)", json.len());

        let value: Value =
            serde_json::from_str(json).map_err(|e| AppError::BackupParse(e.to_string()))?;

        if let Err(reason) = check_document(&value) {
            tracing::warn!("Rejected backup document: {}", reason);
            return Err(AppError::InvalidBackup(reason));
        }

        let (diaries, entries) = into_records(value)?;

        self.repo
            .replace_all(&diaries, &entries)
            .await
            .map_err(|e| {
                tracing::error!("Import failed: {}", e);
                AppError::ImportFailed(e.to_string())
            })?;

        tracing::info!(
            "Backup imported: {} diaries, {} entries",
            diaries.len(),
            entries.len()
        );
        Ok(())
    }

    pub async fn stats(&self) -> Result<BackupStats> {
        let diaries = self.repo.count_diaries().await?;
        let entries = self.repo.count_entries().await?;
        let size = self.export_json().await?.len();

        Ok(BackupStats {
            diaries,
            entries,
            database_size: format_size_estimate(size),
        })
    }

    /// Write `learning-diaries-backup-YYYY-MM-DD.json` into `dir`
    pub async fn export_to_file(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).await?;

        let filename = format!(
            "{}-{}.json",
            BACKUP_FILE_PREFIX,
            Utc::now().format("%Y-%m-%d")
        );
        let path = dir.join(filename);

        let json = self.export_json().await?;
        fs::write(&path, json).await?;

        tracing::info!("Backup exported to {:?}", path);
        Ok(path)
    }

    pub async fn import_from_file(&self, path: &Path) -> Result<()> {
        tracing::info!("Importing backup from {:?}", path);

        let json = fs::read_to_string(path).await?;
        self.import(&json).await
    }
}

fn check_document(document: &Value) -> std::result::Result<(), String> {
    let obj = document
        .as_object()
        .ok_or_else(|| "document is not an object".to_string())?;

    if !obj.get("version").is_some_and(Value::is_string) {
        return Err("missing version".to_string());
    }
    if !obj.get("timestamp").is_some_and(Value::is_string) {
        return Err("missing timestamp".to_string());
    }

    let diaries = obj
        .get("diaries")
        .and_then(Value::as_array)
        .ok_or_else(|| "diaries is not an array".to_string())?;
    let entries = obj
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(|| "entries is not an array".to_string())?;

    let mut diary_ids = HashSet::new();
    for (i, diary) in diaries.iter().enumerate() {
        check_diary(diary).map_err(|field| format!("diary {}: invalid {}", i, field))?;

        if let Some(id) = diary.get("id").and_then(Value::as_i64) {
            if !diary_ids.insert(id) {
                return Err(format!("diary {}: duplicate id {}", i, id));
            }
        }
    }

    let mut days = HashSet::new();
    for (i, entry) in entries.iter().enumerate() {
        check_entry(entry).map_err(|field| format!("entry {}: invalid {}", i, field))?;

        let diary_id = entry.get("diaryId").and_then(Value::as_i64);
        let Some(diary_id) = diary_id.filter(|id| diary_ids.contains(id)) else {
            return Err(format!("entry {}: references a diary not in the backup", i));
        };

        let date = entry.get("date").and_then(Value::as_str).unwrap_or_default();
        if !days.insert((diary_id, date)) {
            return Err(format!(
                "entry {}: diary {} already has an entry on {}",
                i, diary_id, date
            ));
        }
    }

    Ok(())
}

fn check_diary(diary: &Value) -> std::result::Result<(), &'static str> {
    let obj = diary.as_object().ok_or("object")?;

    for field in ["title", "color", "fontColor", "fontFamily"] {
        if !obj.get(field).is_some_and(Value::is_string) {
            return Err(field);
        }
    }
    for field in ["width", "height", "fontSize"] {
        if !obj.get(field).is_some_and(Value::is_number) {
            return Err(field);
        }
    }
    for field in ["bold", "italic"] {
        if !obj.get(field).is_some_and(Value::is_boolean) {
            return Err(field);
        }
    }
    if !is_timestamp(obj.get("createdAt")) {
        return Err("createdAt");
    }
    if obj.get("id").is_some_and(|id| !id.is_i64()) {
        return Err("id");
    }

    Ok(())
}

fn check_entry(entry: &Value) -> std::result::Result<(), &'static str> {
    let obj = entry.as_object().ok_or("object")?;

    if !obj.get("diaryId").is_some_and(Value::is_i64) {
        return Err("diaryId");
    }
    if !obj.get("date").and_then(Value::as_str).is_some_and(is_entry_date) {
        return Err("date");
    }

    let blocks = obj.get("blocks").and_then(Value::as_array).ok_or("blocks")?;
    if !blocks.iter().all(is_block) {
        return Err("blocks");
    }

    if obj.get("createdAt").is_some() && !is_timestamp(obj.get("createdAt")) {
        return Err("createdAt");
    }
    match obj.get("updatedAt") {
        None | Some(Value::Null) => {}
        Some(value) if is_timestamp(Some(value)) => {}
        Some(_) => return Err("updatedAt"),
    }

    Ok(())
}

fn is_block(block: &Value) -> bool {
    let Some(obj) = block.as_object() else {
        return false;
    };

    if !obj.get("payload").is_some_and(Value::is_string) {
        return false;
    }

    match obj.get("kind").and_then(Value::as_str) {
        Some("text") => true,
        Some("image") => matches!(obj.get("caption"), None | Some(Value::Null) | Some(Value::String(_))),
        _ => false,
    }
}

fn is_timestamp(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| s.parse::<DateTime<Utc>>().is_ok())
}

/// Convert a checked document into records for `replace_all`.
fn into_records(document: Value) -> Result<(Vec<Diary>, Vec<Entry>)> {
    let invalid = |e: serde_json::Error| AppError::InvalidBackup(e.to_string());

    let incoming_diaries: Vec<IncomingDiary> = document
        .get("diaries")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(invalid)?
        .unwrap_or_default();
    let incoming_entries: Vec<IncomingEntry> = document
        .get("entries")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(invalid)?
        .unwrap_or_default();

    // Diaries without an id get a placeholder no entry can reference
    let diaries = incoming_diaries
        .into_iter()
        .enumerate()
        .map(|(i, d)| Diary {
            id: d.id.unwrap_or(-(i as i64) - 1),
            title: d.title,
            width: d.width,
            height: d.height,
            color: d.color,
            font_color: d.font_color,
            font_family: d.font_family,
            font_size: d.font_size,
            bold: d.bold,
            italic: d.italic,
            created_at: d.created_at,
        })
        .collect();

    let imported_at = Utc::now();
    let entries = incoming_entries
        .into_iter()
        .map(|e| Entry {
            id: 0,
            diary_id: e.diary_id,
            date: e.date,
            blocks: e.blocks,
            created_at: e.created_at.unwrap_or(imported_at),
            updated_at: e.updated_at,
        })
        .collect();

    Ok((diaries, entries))
}

/// Size rendered in whole KB, or MB with one decimal above 1024 KB
pub fn format_size_estimate(bytes: usize) -> String {
    let kb = (bytes as f64 / 1024.0).round();

    if kb > 1024.0 {
        let mb = (kb / 1024.0 * 10.0).round() / 10.0;
        if mb.fract() == 0.0 {
            format!("{} MB", mb as i64)
        } else {
            format!("{:.1} MB", mb)
        }
    } else {
        format!("{} KB", kb as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{diary_request, memory_store};
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_service() -> (BackupService, Repository) {
        let repo = memory_store().await.repository();
        (BackupService::new(repo.clone()), repo)
    }

    fn diary_json(id: i64) -> Value {
        json!({
            "id": id,
            "title": "French",
            "width": 300,
            "height": 400,
            "color": "#ffffff",
            "fontColor": "#000000",
            "fontFamily": "Arial",
            "fontSize": 14,
            "bold": false,
            "italic": false,
            "createdAt": "2024-01-01T10:00:00.000Z"
        })
    }

    fn entry_json(diary_id: i64, date: &str) -> Value {
        json!({
            "id": 99,
            "diaryId": diary_id,
            "date": date,
            "blocks": [{"kind": "text", "payload": "bonjour"}],
            "createdAt": "2024-01-01T10:05:00.000Z"
        })
    }

    #[test]
    fn test_validate_accepts_empty_document() {
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [],
            "entries": []
        });
        assert!(BackupService::validate(&doc));
    }

    #[test]
    fn test_validate_rejects_missing_entries() {
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": []
        });
        assert!(!BackupService::validate(&doc));
    }

    #[test]
    fn test_validate_rejects_string_font_size() {
        let mut diary = diary_json(1);
        diary["fontSize"] = json!("14");
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary],
            "entries": []
        });
        assert!(!BackupService::validate(&doc));
    }

    #[test]
    fn test_validate_rejects_legacy_content_entries() {
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary_json(1)],
            "entries": [{"diaryId": 1, "date": "2024-01-01", "content": "hello"}]
        });
        assert!(!BackupService::validate(&doc));
    }

    #[test]
    fn test_validate_rejects_dangling_diary_reference() {
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary_json(1)],
            "entries": [entry_json(2, "2024-01-01")]
        });
        assert!(!BackupService::validate(&doc));
    }

    #[test]
    fn test_validate_rejects_impossible_date() {
        for bad in ["2024-13-45", "2023-02-29", "2024-1-01"] {
            let doc = json!({
                "version": "1.0",
                "timestamp": "2024-01-01T00:00:00Z",
                "diaries": [diary_json(1)],
                "entries": [entry_json(1, bad)]
            });
            assert!(!BackupService::validate(&doc), "{} accepted", bad);
        }
    }

    #[test]
    fn test_validate_rejects_two_entries_for_one_day() {
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary_json(1), diary_json(2)],
            "entries": [
                entry_json(1, "2024-01-01"),
                entry_json(2, "2024-01-01"),
                entry_json(1, "2024-01-01")
            ]
        });
        assert!(!BackupService::validate(&doc));
    }

    #[tokio::test]
    async fn test_import_duplicate_day_keeps_data() {
        let (service, repo) = create_test_service().await;
        repo.create_diary(diary_request("Existing")).await.unwrap();

        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary_json(1)],
            "entries": [entry_json(1, "2024-01-01"), entry_json(1, "2024-01-01")]
        });

        let err = service.import(&doc.to_string()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidBackup(_)));
        assert_eq!(repo.count_diaries().await.unwrap(), 1);
        assert_eq!(repo.count_entries().await.unwrap(), 0);
    }

    #[test]
    fn test_format_size_estimate() {
        assert_eq!(format_size_estimate(0), "0 KB");
        assert_eq!(format_size_estimate(2048), "2 KB");
        assert_eq!(format_size_estimate(1024 * 1024), "1024 KB");
        assert_eq!(format_size_estimate(1536 * 1024), "1.5 MB");
        assert_eq!(format_size_estimate(3 * 1024 * 1024), "3 MB");
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let (service, repo) = create_test_service().await;

        let diary = repo.create_diary(diary_request("German")).await.unwrap();
        repo.create_or_append_entry(
            diary.id,
            "2024-03-01",
            vec![
                Block::text("guten tag"),
                Block::Image {
                    payload: "data:image/png;base64,AAAA".to_string(),
                    caption: Some("board".to_string()),
                },
            ],
        )
        .await
        .unwrap();

        let json = service.export_json().await.unwrap();
        let before = service.export().await.unwrap();

        service.import(&json).await.unwrap();
        let after = service.export().await.unwrap();

        assert_eq!(after.version, BACKUP_FORMAT_VERSION);
        assert_eq!(after.diaries.len(), 1);
        assert_eq!(after.entries.len(), 1);
        assert_ne!(after.diaries[0].id, before.diaries[0].id);
        assert_eq!(after.diaries[0].title, before.diaries[0].title);
        assert_eq!(after.diaries[0].created_at, before.diaries[0].created_at);
        assert_eq!(after.entries[0].diary_id, after.diaries[0].id);
        assert_eq!(after.entries[0].blocks, before.entries[0].blocks);
        assert_eq!(after.entries[0].created_at, before.entries[0].created_at);
    }

    #[tokio::test]
    async fn test_import_replaces_existing_data() {
        let (service, repo) = create_test_service().await;
        repo.create_diary(diary_request("Local only")).await.unwrap();

        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary_json(7)],
            "entries": [entry_json(7, "2024-01-02")]
        });
        service.import(&doc.to_string()).await.unwrap();

        let diaries = repo.list_diaries().await.unwrap();
        assert_eq!(diaries.len(), 1);
        assert_eq!(diaries[0].title, "French");

        let entry = repo.get_entry(diaries[0].id, "2024-01-02").await.unwrap().unwrap();
        assert_eq!(entry.blocks, vec![Block::text("bonjour")]);
    }

    #[tokio::test]
    async fn test_import_malformed_json() {
        let (service, _) = create_test_service().await;
        let err = service.import("{ not json").await.unwrap_err();
        assert!(matches!(err, AppError::BackupParse(_)));
    }

    #[tokio::test]
    async fn test_import_invalid_document_keeps_data() {
        let (service, repo) = create_test_service().await;
        repo.create_diary(diary_request("Keep me")).await.unwrap();

        let err = service.import(r#"{"version": "1.0"}"#).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidBackup(_)));
        assert_eq!(repo.count_diaries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_import_rolls_back() {
        let (service, repo) = create_test_service().await;
        repo.create_diary(diary_request("Keep me")).await.unwrap();

        // Passes validation but violates the date column check on insert
        let doc = json!({
            "version": "1.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "diaries": [diary_json(1)],
            "entries": [entry_json(1, "someday")]
        });

        let err = service.import(&doc.to_string()).await.unwrap_err();
        assert!(matches!(err, AppError::ImportFailed(_)));

        let diaries = repo.list_diaries().await.unwrap();
        assert_eq!(diaries.len(), 1);
        assert_eq!(diaries[0].title, "Keep me");
    }

    #[tokio::test]
    async fn test_stats_and_file_round_trip() {
        let (service, repo) = create_test_service().await;
        let diary = repo.create_diary(diary_request("Japanese")).await.unwrap();
        repo.create_or_append_entry(diary.id, "2024-05-05", vec![Block::text("konnichiwa")])
            .await
            .unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.diaries, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.database_size.ends_with("KB"));

        let temp_dir = TempDir::new().unwrap();
        let path = service.export_to_file(temp_dir.path()).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("learning-diaries-backup-"));
        assert!(name.ends_with(".json"));

        service.import_from_file(&path).await.unwrap();
        assert_eq!(repo.count_entries().await.unwrap(), 1);
    }
}
