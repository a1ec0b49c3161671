use anyhow::{Context, Result};
use gallery_service::auth::{AdminAuth, PgAdminStore};
use gallery_service::media_host::{CloudMediaHost, DeliveryUrls, MediaHost};
use gallery_service::metadata_store::{MediaRepository, PgMediaRepository};
use gallery_service::telemetry::{init_metrics, init_tracing};
use gallery_service::{start_api_server, AppState, ChangeFeed, Config, S3BlobStore, UploadOrchestrator};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        "Starting Wedding Album Gallery Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let pg_repository = PgMediaRepository::new(&config.database)
        .await
        .context("Failed to initialize metadata store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        pg_repository
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let pool = pg_repository.pool().clone();
    let repository: Arc<dyn MediaRepository> = Arc::new(pg_repository);

    if !config.media_host.is_configured() {
        warn!("media_host.cloud_name / media_host.upload_preset missing; uploads will be refused");
    }

    let cloud_host = CloudMediaHost::new(&config.media_host).context("Failed to initialize media host client")?;
    let delivery = Arc::new(cloud_host.delivery().clone());
    let media_host: Arc<dyn MediaHost> = Arc::new(cloud_host);

    let blob_store = Arc::new(S3BlobStore::new(&config.blob_store).await);

    let orchestrator = Arc::new(UploadOrchestrator::new(
        media_host.clone(),
        repository.clone(),
        &config.media_host,
    ));

    let auth = Arc::new(AdminAuth::new(
        Arc::new(PgAdminStore::new(pool.clone())),
        config.session_ttl(),
    ));

    let shutdown = CancellationToken::new();
    let changes = ChangeFeed::default();
    let feed_handle = changes.spawn_listener(pool, shutdown.clone());

    // Create API state
    let api_state = AppState {
        repository,
        orchestrator,
        media_host,
        delivery,
        blob_store,
        auth,
        changes,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Gallery service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down gallery service");

    // In-flight uploads finish before the server returns
    shutdown.cancel();
    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task panicked");
    }
    feed_handle.abort();

    info!("Gallery service stopped");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
