//! Application configuration
//!
//! Central location for constants, time windows and remote endpoints used
//! throughout the application, plus the runtime `SyncConfig`.

use chrono::Duration;

// ===== Entry Editing =====

/// How long after creation an entry may still be edited or deleted.
pub const ENTRY_EDIT_WINDOW_MINUTES: i64 = 15;

pub fn entry_edit_window() -> Duration {
    Duration::minutes(ENTRY_EDIT_WINDOW_MINUTES)
}

// ===== Backup Document =====

/// Format version written into every exported backup document.
pub const BACKUP_FORMAT_VERSION: &str = "1.0";

/// Prefix for locally exported backup files (`<prefix>-YYYY-MM-DD.json`).
pub const BACKUP_FILE_PREFIX: &str = "learning-diaries-backup";

// ===== Token Broker =====

/// A cached token is reused only while it has more than this left.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// A profile fetched within this window counts as signed in even after
/// the access token itself expired.
pub const SESSION_GRACE_HOURS: i64 = 24;

/// OAuth scopes requested from Google.
pub const OAUTH_SCOPE: &str = "openid email profile https://www.googleapis.com/auth/drive.file";

// ===== Auto-Backup =====

/// Auto-backup check cadence: top of every hour.
pub const AUTO_BACKUP_CRON: &str = "0 0 * * * *";

/// Minimum age of the last successful backup before auto-backup runs again.
pub const AUTO_BACKUP_INTERVAL_HOURS: i64 = 24;

// ===== Google Drive =====

pub const DRIVE_FOLDER_NAME: &str = "Learning Diaries Backups";
pub const DRIVE_BACKUP_FILENAME: &str = "learning-diaries-backup.json";
pub const DRIVE_FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

// ===== Images =====

pub const IMAGE_MAX_WIDTH: u32 = 1200;
pub const IMAGE_MAX_HEIGHT: u32 = 1200;
pub const IMAGE_QUALITY: f32 = 0.8;
pub const IMAGE_MAX_SIZE_KB: u64 = 2048;

/// Mime types accepted for image blocks
pub const VALID_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];

/// Runtime configuration for the Drive sync stack
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub client_id: String,
    pub scope: String,
    pub folder_name: String,
    pub backup_filename: String,
    pub drive_api_base: String,
    pub upload_api_base: String,
    pub userinfo_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            scope: OAUTH_SCOPE.to_string(),
            folder_name: DRIVE_FOLDER_NAME.to_string(),
            backup_filename: DRIVE_BACKUP_FILENAME.to_string(),
            drive_api_base: DRIVE_API_BASE.to_string(),
            upload_api_base: DRIVE_UPLOAD_BASE.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
        }
    }
}

impl SyncConfig {
    /// Default configuration with the client id taken from `GOOGLE_CLIENT_ID`.
    pub fn from_env() -> Self {
        Self {
            client_id: std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::with_client_id("abc.apps.googleusercontent.com");

        assert_eq!(config.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.folder_name, DRIVE_FOLDER_NAME);
        assert_eq!(config.backup_filename, DRIVE_BACKUP_FILENAME);
        assert!(config.scope.contains("drive.file"));
        assert!(SyncConfig::default().client_id.is_empty());
    }

    #[test]
    fn test_edit_window() {
        assert_eq!(entry_edit_window(), Duration::minutes(15));
    }
}
