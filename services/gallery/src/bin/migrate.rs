//! Moves legacy uploads from the S3 bucket onto the media host.

use anyhow::{Context, Result};
use clap::Parser;
use gallery_service::telemetry::init_tracing;
use gallery_service::{CloudMediaHost, Config, LegacyMigrator, PgMediaRepository, S3BlobStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "gallery-migrate", about = "Migrate legacy uploads to the media host")]
struct Args {
    /// Also remove legacy blobs of records that are already migrated
    #[arg(long)]
    cleanup: bool,

    /// Pause between records in milliseconds
    #[arg(long, default_value_t = 100)]
    pause_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level, "pretty");

    let repository = PgMediaRepository::new(&config.database)
        .await
        .context("Failed to initialize metadata store")?;
    if config.database.run_migrations {
        repository.run_migrations().await?;
    }

    let host = CloudMediaHost::new(&config.media_host).context("Failed to initialize media host client")?;
    let blobs = S3BlobStore::new(&config.blob_store).await;

    let migrator = LegacyMigrator::new(
        Arc::new(repository),
        Arc::new(host),
        Arc::new(blobs),
        &config.media_host,
    )
    .with_pause(Duration::from_millis(args.pause_ms));

    let report = migrator.migrate().await.context("Migration failed")?;
    info!(
        migrated = report.succeeded,
        failed = report.failed,
        "Migration complete"
    );

    if args.cleanup {
        let cleaned = migrator.cleanup().await.context("Cleanup failed")?;
        info!(
            removed = cleaned.succeeded,
            failed = cleaned.failed,
            "Legacy cleanup complete"
        );
    }

    Ok(())
}
