use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use harvester_pipeline::{
    ChangeCache, DownloadSettings, DownloadWorker, PgChangeCache, PgServerSource, PgStatusStore,
    PgTaskQueue, QueueRunner, ScanOrchestrator, ScanScheduler, StatusTracker, TaskQueue,
    UploadWorker,
};
use harvester_remote::{RemoteConnector, SftpConnector};
use harvester_storage::{ObjectStore, S3ObjectStore};
use harvester_worker::config::WorkerConfig;
use harvester_worker::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    logging::init(config.log_format);
    tracing::info!(
        staging_root = %config.staging_root.display(),
        s3_endpoint = %config.s3.endpoint,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = harvester_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    harvester_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    harvester_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Object storage ---
    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(&config.s3).await);
    tracing::info!(endpoint = %config.s3.endpoint, "Object store client created");

    // --- Pipeline ---
    let queue: Arc<dyn TaskQueue> = Arc::new(PgTaskQueue::new(pool.clone()));
    let cache: Arc<dyn ChangeCache> = Arc::new(PgChangeCache::new(pool.clone()));
    let statuses = StatusTracker::new(Arc::new(PgStatusStore::new(pool.clone())));
    let connector: Arc<dyn RemoteConnector> =
        Arc::new(SftpConnector::new(config.ssh_connect_timeout));

    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::new(PgServerSource::new(pool.clone())),
        Arc::clone(&cache),
        Arc::clone(&connector),
        Arc::clone(&queue),
    ));
    let download_worker = Arc::new(DownloadWorker::new(
        connector,
        statuses.clone(),
        Arc::clone(&queue),
        DownloadSettings {
            staging_root: config.staging_root.clone(),
            settle_delay: config.settle_delay,
            retry: config.retry.clone(),
        },
    ));
    let upload_worker = Arc::new(
        UploadWorker::new(objects, statuses, config.retry.clone())
            .remove_staged_after_upload(config.remove_staged_after_upload),
    );

    let cancel = CancellationToken::new();
    let mut handles: Vec<(&str, JoinHandle<()>)> = Vec::new();

    let scans = QueueRunner::new(Arc::clone(&queue), orchestrator, config.scan_concurrency)
        .with_poll_interval(config.queue_poll_interval);
    let token = cancel.clone();
    handles.push(("scan runner", tokio::spawn(async move { scans.run(token).await })));

    let downloads = QueueRunner::new(
        Arc::clone(&queue),
        download_worker,
        config.download_concurrency,
    )
    .with_poll_interval(config.queue_poll_interval);
    let token = cancel.clone();
    handles.push((
        "download runner",
        tokio::spawn(async move { downloads.run(token).await }),
    ));

    let uploads = QueueRunner::new(Arc::clone(&queue), upload_worker, config.upload_concurrency)
        .with_poll_interval(config.queue_poll_interval);
    let token = cancel.clone();
    handles.push((
        "upload runner",
        tokio::spawn(async move { uploads.run(token).await }),
    ));

    let scheduler = ScanScheduler::new(queue, cache)
        .with_intervals(config.scan_interval, config.cache_purge_interval);
    let token = cancel.clone();
    handles.push((
        "scan scheduler",
        tokio::spawn(async move { scheduler.run(token).await }),
    ));

    tracing::info!(
        scan_concurrency = config.scan_concurrency,
        download_concurrency = config.download_concurrency,
        upload_concurrency = config.upload_concurrency,
        "Harvester worker started"
    );

    shutdown_signal().await;

    // --- Shutdown ---
    tracing::info!("Shutdown requested, waiting for in-flight tasks");
    cancel.cancel();

    for (name, handle) in handles {
        match tokio::time::timeout(config.shutdown_timeout, handle).await {
            Ok(Ok(())) => tracing::info!(task = name, "Stopped"),
            Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task panicked"),
            Err(_) => tracing::warn!(task = name, "Did not stop within the shutdown timeout"),
        }
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never fires
/// and the other signal still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
