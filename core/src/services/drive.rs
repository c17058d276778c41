//! Google Drive sync
//!
//! Keeps exactly one backup file inside one named folder. Backup
//! overwrites that file if it exists and creates it otherwise; restore
//! downloads it and hands it to the backup service for import.

use crate::config::{SyncConfig, DRIVE_FOLDER_MIME_TYPE};
use crate::error::{AppError, Result};
use crate::platform::{HttpRequest, HttpResponse, HttpTransport};
use crate::services::auth::TokenBroker;
use crate::services::backup::BackupService;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    reason: Option<String>,
}

/// Drive sync client
pub struct DriveSync {
    config: SyncConfig,
    http: Arc<dyn HttpTransport>,
    broker: Arc<TokenBroker>,
    backup: BackupService,
}

impl DriveSync {
    pub fn new(
        config: SyncConfig,
        http: Arc<dyn HttpTransport>,
        broker: Arc<TokenBroker>,
        backup: BackupService,
    ) -> Self {
        Self {
            config,
            http,
            broker,
            backup,
        }
    }

    /// Upload the current store, returning the remote file id
    pub async fn backup(&self) -> Result<String> {
        tracing::info!("Starting Drive backup");

        let token = self.broker.get_access_token().await?;
        let content = self.backup.export_json().await?;

        let folder_id = match self.find_folder(&token).await? {
            Some(id) => id,
            None => self.create_folder(&token).await?,
        };

        let file_id = match self.find_backup_file(&token, &folder_id).await? {
            Some(id) => {
                self.update_file(&token, &id, content).await?;
                id
            }
            None => self.create_file(&token, &folder_id, content).await?,
        };

        self.broker.update_last_backup_time().await?;

        tracing::info!("Drive backup complete: {}", file_id);
        Ok(file_id)
    }

    /// Replace the local store with the remote backup
    pub async fn restore(&self) -> Result<()> {
        tracing::info!("Starting Drive restore");

        let token = self.broker.get_access_token().await?;

        let folder_id = self
            .find_folder(&token)
            .await?
            .ok_or(AppError::BackupNotFound)?;
        let file_id = self
            .find_backup_file(&token, &folder_id)
            .await?
            .ok_or(AppError::BackupNotFound)?;

        let content = self.download_file(&token, &file_id).await?;
        self.backup.import(&content).await?;

        tracing::info!("Drive restore complete");
        Ok(())
    }

    async fn find_folder(&self, token: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_query(&self.config.folder_name),
            DRIVE_FOLDER_MIME_TYPE
        );
        self.find_first(token, &query, "search for backup folder")
            .await
    }

    async fn create_folder(&self, token: &str) -> Result<String> {
        let metadata = json!({
            "name": self.config.folder_name,
            "mimeType": DRIVE_FOLDER_MIME_TYPE,
        });

        let request = HttpRequest::post(format!("{}/files?fields=id", self.config.drive_api_base))
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(&metadata)?);

        let response = self.send(token, request, "create backup folder").await?;
        let created: FileRef = serde_json::from_slice(&response.body)?;

        tracing::info!("Created Drive folder: {}", created.id);
        Ok(created.id)
    }

    async fn find_backup_file(&self, token: &str, folder_id: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(&self.config.backup_filename),
            escape_query(folder_id)
        );
        self.find_first(token, &query, "search for existing backup file")
            .await
    }

    /// First match of a files query. Duplicates are not reconciled.
    async fn find_first(&self, token: &str, query: &str, action: &str) -> Result<Option<String>> {
        let url = Url::parse_with_params(
            &format!("{}/files", self.config.drive_api_base),
            &[("q", query), ("fields", "files(id,name)")],
        )
        .map_err(|e| AppError::Config(format!("Invalid Drive URL: {}", e)))?;

        let response = self
            .send(token, HttpRequest::get(url.as_str()), action)
            .await?;
        let list: FileList = serde_json::from_slice(&response.body)?;

        if list.files.len() > 1 {
            tracing::warn!("{}: {} matches, using the first", action, list.files.len());
        }

        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_file(&self, token: &str, folder_id: &str, content: String) -> Result<String> {
        let metadata = json!({
            "name": self.config.backup_filename,
            "parents": [folder_id],
        });

        let boundary = format!("learning-diaries-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &serde_json::to_string(&metadata)?, &content);

        let request = HttpRequest::post(format!(
            "{}/files?uploadType=multipart&fields=id",
            self.config.upload_api_base
        ))
        .header(
            "Content-Type",
            format!("multipart/related; boundary={}", boundary),
        )
        .body(body);

        let response = self.send(token, request, "create backup file").await?;
        let created: FileRef = serde_json::from_slice(&response.body)?;

        tracing::info!("Created Drive backup file: {}", created.id);
        Ok(created.id)
    }

    async fn update_file(&self, token: &str, file_id: &str, content: String) -> Result<()> {
        let request = HttpRequest::patch(format!(
            "{}/files/{}?uploadType=media",
            self.config.upload_api_base, file_id
        ))
        .header("Content-Type", "application/json")
        .body(content);

        self.send(token, request, "update backup file").await?;

        tracing::debug!("Updated Drive backup file: {}", file_id);
        Ok(())
    }

    async fn download_file(&self, token: &str, file_id: &str) -> Result<String> {
        let request = HttpRequest::get(format!(
            "{}/files/{}?alt=media",
            self.config.drive_api_base, file_id
        ));

        let response = self.send(token, request, "download backup file").await?;
        Ok(response.text())
    }

    async fn send(&self, token: &str, request: HttpRequest, action: &str) -> Result<HttpResponse> {
        let response = self.http.send(request.bearer(token)).await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(remote_error(action, &response))
        }
    }
}

/// Map a non-2xx Drive response to a structured error. The raw body is
/// logged only.
fn remote_error(action: &str, response: &HttpResponse) -> AppError {
    tracing::warn!(
        "Drive {} failed ({}): {}",
        action,
        response.status,
        response.text()
    );

    let detail = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|b| b.error);

    let (message, reason) = match detail {
        Some(detail) => {
            let reason = detail
                .status
                .or_else(|| detail.errors.into_iter().find_map(|e| e.reason));
            let message = match detail.message {
                Some(m) => format!("{} failed: {}", action, m),
                None => format!("{} failed with status {}", action, response.status),
            };
            (message, reason)
        }
        None => (
            format!("{} failed with status {}", action, response.status),
            None,
        ),
    };

    AppError::Remote {
        action: action.to_string(),
        status: response.status,
        reason,
        message,
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_related(boundary: &str, metadata: &str, content: &str) -> Vec<u8> {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n\
         --{b}\r\nContent-Type: application/json\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        m = metadata,
        c = content
    )
    .into_bytes()
}
