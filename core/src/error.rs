//! Error types for Learning Diaries
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to a frontend as their display string.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Schema upgrade to version {version} failed: {reason}")]
    SchemaUpgrade { version: i64, reason: String },

    #[error("Could not parse backup: {0}")]
    BackupParse(String),

    #[error("Invalid backup format: {0}")]
    InvalidBackup(String),

    #[error("Import failed: {0}")]
    ImportFailed(String),

    #[error("{message}")]
    Authorization {
        message: String,
        code: Option<String>,
    },

    #[error("{message}")]
    Remote {
        action: String,
        status: u16,
        reason: Option<String>,
        message: String,
    },

    #[error("No backup file found")]
    BackupNotFound,

    #[error("Diary not found: {0}")]
    DiaryNotFound(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{0}")]
    Generic(String),
}

/// Coarse classification callers branch on instead of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaUpgradeFailure,
    ValidationFailure,
    TransactionFailure,
    AuthorizationFailure,
    RemoteProtocolFailure,
    NotFoundFailure,
    Storage,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::SchemaUpgrade { .. } => ErrorKind::SchemaUpgradeFailure,
            AppError::BackupParse(_) | AppError::InvalidBackup(_) | AppError::Validation(_) => {
                ErrorKind::ValidationFailure
            }
            AppError::ImportFailed(_) => ErrorKind::TransactionFailure,
            AppError::Authorization { .. } => ErrorKind::AuthorizationFailure,
            AppError::Remote { .. } | AppError::Http(_) => ErrorKind::RemoteProtocolFailure,
            AppError::BackupNotFound | AppError::DiaryNotFound(_) => ErrorKind::NotFoundFailure,
            AppError::Database(_) | AppError::Io(_) => ErrorKind::Storage,
            AppError::Serialization(_)
            | AppError::Config(_)
            | AppError::Scheduler(_)
            | AppError::Generic(_) => ErrorKind::Internal,
        }
    }

    /// Authorization failure with an optional provider code.
    pub fn authorization(message: impl Into<String>, code: Option<String>) -> Self {
        AppError::Authorization {
            message: message.into(),
            code,
        }
    }

    /// HTTP status of a remote failure, if this is one.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            AppError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable reason of a remote failure, if the service sent one.
    pub fn remote_reason(&self) -> Option<&str> {
        match self {
            AppError::Remote { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// Provider code of an authorization failure.
    pub fn auth_code(&self) -> Option<&str> {
        match self {
            AppError::Authorization { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_exposes_status_and_reason() {
        let err = AppError::Remote {
            action: "create backup file".to_string(),
            status: 403,
            reason: Some("storageQuotaExceeded".to_string()),
            message: "create backup file failed: quota".to_string(),
        };

        assert_eq!(err.kind(), ErrorKind::RemoteProtocolFailure);
        assert_eq!(err.remote_status(), Some(403));
        assert_eq!(err.remote_reason(), Some("storageQuotaExceeded"));
    }

    #[test]
    fn test_error_serializes_as_message() {
        let json = serde_json::to_string(&AppError::BackupNotFound).unwrap();
        assert_eq!(json, "\"No backup file found\"");
    }
}
