// Learning Diaries - local maintenance tool
// Opens the diary store (running pending upgrades) and drives the backup codec

use anyhow::{bail, Context};
use learning_diaries::database::SchemaStore;
use learning_diaries::services::BackupService;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: learning-diaries <data-dir> <stats | export <dir> | import <file>>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "learning_diaries=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(data_dir) = args.first() else {
        bail!(USAGE);
    };

    tracing::info!("Starting Learning Diaries maintenance");

    let db_path = PathBuf::from(data_dir).join("learning-diaries.db");
    let store = SchemaStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open diary store at {}", db_path.display()))?;
    let backup = BackupService::new(store.repository());

    match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("stats"), None) => {
            let stats = backup.stats().await?;
            println!("schema version: {}", store.version());
            println!("diaries:        {}", stats.diaries);
            println!("entries:        {}", stats.entries);
            println!("export size:    {}", stats.database_size);
        }
        (Some("export"), Some(dir)) => {
            let path = backup.export_to_file(&PathBuf::from(dir)).await?;
            println!("{}", path.display());
        }
        (Some("import"), Some(file)) => {
            backup
                .import_from_file(&PathBuf::from(file))
                .await
                .with_context(|| format!("failed to import {}", file))?;
            println!("imported {}", file);
        }
        _ => {
            store.close().await;
            bail!(USAGE);
        }
    }

    store.close().await;
    Ok(())
}
