//! Application state and initialization
//!
//! Every service is constructed once here and shared by reference; there
//! are no global singletons. The host supplies the platform capabilities.

use crate::config::SyncConfig;
use crate::database::SchemaStore;
use crate::error::Result;
use crate::platform::{
    FileKeyValueStore, HttpTransport, IdentityProvider, KeyValueStore, ReqwestTransport,
};
use crate::services::{AutoBackupScheduler, BackupService, DriveSync, JournalService, TokenBroker};
use std::path::PathBuf;
use std::sync::Arc;

/// Capabilities injected by the host
#[derive(Clone)]
pub struct Platform {
    pub http: Arc<dyn HttpTransport>,
    pub slots: Arc<dyn KeyValueStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Platform {
    /// reqwest transport and file-backed slots in `app_data_dir`
    pub fn desktop(app_data_dir: PathBuf, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        Ok(Self {
            http: Arc::new(ReqwestTransport::new()?),
            slots: Arc::new(FileKeyValueStore::new(app_data_dir)),
            identity,
        })
    }
}

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: PathBuf,
    pub store: SchemaStore,
    pub journal: JournalService,
    pub backup: BackupService,
    pub broker: Arc<TokenBroker>,
    pub drive: Arc<DriveSync>,
    pub scheduler: Arc<AutoBackupScheduler>,
}

impl AppState {
    /// Open the store (running pending upgrades), wire the services and
    /// resume auto-backup if it was left enabled.
    pub async fn initialize(
        app_data_dir: PathBuf,
        config: SyncConfig,
        platform: Platform,
    ) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", app_data_dir);

        std::fs::create_dir_all(&app_data_dir)?;

        let store = SchemaStore::open(&app_data_dir.join("learning-diaries.db")).await?;
        let repo = store.repository();

        let journal = JournalService::new(repo.clone());
        let backup = BackupService::new(repo);

        let broker = Arc::new(TokenBroker::new(
            config.clone(),
            platform.identity,
            platform.http.clone(),
            platform.slots,
        ));
        let drive = Arc::new(DriveSync::new(
            config,
            platform.http,
            broker.clone(),
            backup.clone(),
        ));

        let scheduler = Arc::new(AutoBackupScheduler::new(broker.clone(), drive.clone()).await?);
        scheduler.start().await?;
        scheduler.resume().await?;

        tracing::info!("Application initialized successfully");

        Ok(Self {
            app_data_dir,
            store,
            journal,
            backup,
            broker,
            drive,
            scheduler,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await?;
        self.store.close().await;
        Ok(())
    }
}
