/// Auto-backup scheduler
/// Checks hourly whether the last Drive backup is older than the backup
/// interval and runs a new one when it is.
use crate::config::{AUTO_BACKUP_CRON, AUTO_BACKUP_INTERVAL_HOURS};
use crate::error::{AppError, Result};
use crate::services::{DriveSync, TokenBroker};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Whether a backup is due at `now`. Without a recorded backup nothing is
/// due; the first backup is always manual.
pub fn is_backup_due(last_backup: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_backup {
        Some(last) => now - last >= Duration::hours(AUTO_BACKUP_INTERVAL_HOURS),
        None => false,
    }
}

/// One scheduler tick. Returns whether a backup ran successfully.
pub async fn run_due_backup(broker: &TokenBroker, drive: &DriveSync) -> bool {
    let last_backup = match broker.last_backup().await {
        Ok(last) => last,
        Err(e) => {
            tracing::error!("Failed to read last backup time: {}", e);
            return false;
        }
    };

    if !is_backup_due(last_backup, Utc::now()) {
        tracing::debug!("Automatic backup not due");
        return false;
    }

    tracing::info!("Running scheduled automatic backup");

    match drive.backup().await {
        Ok(file_id) => {
            tracing::info!("Automatic backup uploaded: {}", file_id);
            true
        }
        Err(e) => {
            tracing::error!("Automatic backup failed: {}", e);
            false
        }
    }
}

/// Scheduler service for automatic Drive backups
pub struct AutoBackupScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    broker: Arc<TokenBroker>,
    drive: Arc<DriveSync>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl AutoBackupScheduler {
    /// Create new scheduler service
    pub async fn new(broker: Arc<TokenBroker>, drive: Arc<DriveSync>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            broker,
            drive,
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Auto-backup scheduler started");
        Ok(())
    }

    /// Persist the auto-backup flag and schedule or cancel the hourly check
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.broker.set_auto_backup(enabled).await?;

        if enabled {
            self.schedule().await
        } else {
            self.cancel().await
        }
    }

    /// Schedule the hourly check if the stored flag is set
    pub async fn resume(&self) -> Result<()> {
        if self.broker.auto_backup_enabled().await? {
            self.schedule().await?;
        }
        Ok(())
    }

    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    async fn schedule(&self) -> Result<()> {
        // Remove existing job if any
        self.cancel().await?;

        let broker = Arc::clone(&self.broker);
        let drive = Arc::clone(&self.drive);

        let job = Job::new_async(AUTO_BACKUP_CRON.to_string(), move |_uuid, _l| {
            let broker = Arc::clone(&broker);
            let drive = Arc::clone(&drive);
            Box::pin(async move {
                run_due_backup(&broker, &drive).await;
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create backup job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule job: {}", e)))?;

        let mut current_job = self.current_job_id.write().await;
        *current_job = Some(job_id);

        tracing::info!("Automatic backup check scheduled ({})", AUTO_BACKUP_CRON);
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = *current_job {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Scheduler(format!("Failed to remove job: {}", e)))?;

            *current_job = None;
            tracing::info!("Automatic backup schedule cancelled");
        }

        Ok(())
    }

    /// Shutdown scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("Auto-backup scheduler shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::platform::{HttpMethod, KeyValueStore, MemoryKeyValueStore};
    use crate::services::auth::slots;
    use crate::services::BackupService;
    use crate::test_support::{memory_store, FakeIdentityProvider, FakeTransport};

    async fn setup(last_backup: Option<DateTime<Utc>>) -> (Arc<TokenBroker>, Arc<DriveSync>, Arc<FakeTransport>) {
        let slots_store = Arc::new(MemoryKeyValueStore::new());
        let expiry = Utc::now() + Duration::hours(1);
        slots_store.set(slots::ACCESS_TOKEN, "t").await.unwrap();
        slots_store
            .set(slots::ACCESS_TOKEN_EXPIRY, &expiry.timestamp_millis().to_string())
            .await
            .unwrap();
        if let Some(last) = last_backup {
            slots_store
                .set(slots::LAST_BACKUP, &last.timestamp_millis().to_string())
                .await
                .unwrap();
        }

        let http = FakeTransport::new();
        let config = SyncConfig::with_client_id("client-123");
        let broker = Arc::new(TokenBroker::new(
            config.clone(),
            FakeIdentityProvider::new(vec![]),
            http.clone(),
            slots_store,
        ));
        let backup = BackupService::new(memory_store().await.repository());
        let drive = Arc::new(DriveSync::new(config, http.clone(), broker.clone(), backup));

        (broker, drive, http)
    }

    #[test]
    fn test_is_backup_due() {
        let now = Utc::now();

        assert!(!is_backup_due(None, now));
        assert!(!is_backup_due(Some(now - Duration::hours(23)), now));
        assert!(is_backup_due(Some(now - Duration::hours(24)), now));
        assert!(is_backup_due(Some(now - Duration::days(3)), now));
    }

    #[tokio::test]
    async fn test_tick_skips_recent_backup() {
        let (broker, drive, http) = setup(Some(Utc::now() - Duration::hours(2))).await;

        assert!(!run_due_backup(&broker, &drive).await);
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_tick_runs_overdue_backup() {
        let (broker, drive, http) = setup(Some(Utc::now() - Duration::hours(25))).await;
        http.respond(HttpMethod::Get, "mimeType", 200, r#"{"files":[{"id":"folder-1"}]}"#);
        http.respond(HttpMethod::Get, "in+parents", 200, r#"{"files":[{"id":"file-1"}]}"#);
        http.respond(HttpMethod::Patch, "file-1", 200, "{}");

        assert!(run_due_backup(&broker, &drive).await);

        let last = broker.last_backup().await.unwrap().unwrap();
        assert!(Utc::now() - last < Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_failed_tick_is_swallowed() {
        let (broker, drive, http) = setup(Some(Utc::now() - Duration::hours(25))).await;
        http.respond(HttpMethod::Get, "mimeType", 500, "oops");

        assert!(!run_due_backup(&broker, &drive).await);
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_enabled_persists_and_schedules() {
        let (broker, drive, _http) = setup(None).await;
        let scheduler = AutoBackupScheduler::new(broker.clone(), drive).await.unwrap();

        scheduler.set_enabled(true).await.unwrap();
        assert!(broker.auto_backup_enabled().await.unwrap());
        assert!(scheduler.is_scheduled().await);

        scheduler.set_enabled(false).await.unwrap();
        assert!(!broker.auto_backup_enabled().await.unwrap());
        assert!(!scheduler.is_scheduled().await);
    }
}
