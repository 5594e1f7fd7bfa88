use anyhow::{Context, Result, bail};
use gridfile::{
    BucketRegistry, UploadOptions,
    config::{AppConfig, Command},
    store::sqlite::SqliteDatabase,
};
use std::{fs, path::Path, sync::Arc};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting gridfile with config: {:?}", cfg);

    // --- Ensure the SQLite file's directory exists ---
    if !cfg.database_url.contains(":memory:") {
        let db_path = cfg
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let db = SqliteDatabase::connect(&cfg.database_url, 5)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;
    let registry = BucketRegistry::new(Arc::new(db));
    let session = registry.session(&cfg.collection).await?;

    match command {
        Command::Put {
            path,
            filename,
            content_type,
            aliases,
            metadata,
        } => {
            let filename = filename
                .or_else(|| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .unwrap_or_default();

            let mut options = UploadOptions::new(filename).chunk_size(cfg.chunk_size);
            options.content_type = content_type;
            options.aliases = aliases;
            if let Some(raw) = metadata {
                let value = serde_json::from_str(&raw).context("parsing --metadata as JSON")?;
                options = options.metadata(value);
            }

            let file = File::open(&path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            let record = session.upload(ReaderStream::new(file), options).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Get { id, output } => {
            let file = File::create(&output)
                .await
                .with_context(|| format!("creating {}", output.display()))?;
            if let Err(err) = session.download(id, file).await {
                if let Err(cleanup) = tokio::fs::remove_file(&output).await {
                    tracing::warn!(
                        "Failed to remove partial download {}: {}",
                        output.display(),
                        cleanup
                    );
                }
                return Err(err.into());
            }
            tracing::info!("Wrote {} to {}", id, output.display());
        }
        Command::Stat { id } => match session.find_by_id(id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => bail!("file {} not found in {}", id, cfg.collection),
        },
        Command::Rm { id } => match session.delete(id).await? {
            Some(record) => println!("deleted {} ({})", record.id, record.filename),
            None => println!("{} not found", id),
        },
        Command::Orphans { min_idle_secs } => {
            let min_idle = chrono::Duration::seconds(i64::from(min_idle_secs));
            for id in session.find_orphans(min_idle).await? {
                println!("{}", id);
            }
        }
    }

    registry.teardown().await;
    Ok(())
}
