//! Periodic scan trigger and housekeeping.
//!
//! Enqueues one scan task every `scan_interval` unless one is already
//! waiting or running. Every `housekeeping_interval` it purges expired
//! change cache entries and old completed tasks.

use std::sync::Arc;
use std::time::Duration;

use harvester_core::task::{ScanTask, QUEUE_SCAN};
use tokio_util::sync::CancellationToken;

use crate::cache::ChangeCache;
use crate::error::PipelineError;
use crate::queue::{enqueue_task, TaskQueue};

/// Default time between scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default time between housekeeping runs.
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// Completed tasks older than this are deleted by housekeeping.
pub const COMPLETED_TASK_RETENTION: Duration = Duration::from_secs(24 * 3600);

pub struct ScanScheduler {
    queue: Arc<dyn TaskQueue>,
    cache: Arc<dyn ChangeCache>,
    scan_interval: Duration,
    housekeeping_interval: Duration,
}

impl ScanScheduler {
    pub fn new(queue: Arc<dyn TaskQueue>, cache: Arc<dyn ChangeCache>) -> Self {
        Self {
            queue,
            cache,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            housekeeping_interval: DEFAULT_HOUSEKEEPING_INTERVAL,
        }
    }

    pub fn with_intervals(mut self, scan: Duration, housekeeping: Duration) -> Self {
        self.scan_interval = scan;
        self.housekeeping_interval = housekeeping;
        self
    }

    /// Run until `cancel` fires. The first scan is scheduled immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            housekeeping_interval_secs = self.housekeeping_interval.as_secs(),
            "Scan scheduler started",
        );

        let mut scan_ticker = tokio::time::interval(self.scan_interval);
        let mut housekeeping_ticker = tokio::time::interval(self.housekeeping_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scan scheduler stopping");
                    break;
                }
                _ = scan_ticker.tick() => {
                    if let Err(e) = self.schedule_scan().await {
                        tracing::error!(error = %e, "Failed to schedule scan");
                    }
                }
                _ = housekeeping_ticker.tick() => {
                    self.housekeeping().await;
                }
            }
        }
    }

    /// Enqueue a scan task unless one is already pending or running.
    /// Returns whether a task was enqueued.
    pub async fn schedule_scan(&self) -> Result<bool, PipelineError> {
        let open = self.queue.pending_count(QUEUE_SCAN).await?;
        if open > 0 {
            tracing::debug!(open, "Scan already queued, skipping tick");
            return Ok(false);
        }
        let task_id = enqueue_task(self.queue.as_ref(), QUEUE_SCAN, &ScanTask::default()).await?;
        tracing::debug!(task_id, "Scan scheduled");
        Ok(true)
    }

    /// Purge expired cache entries and old completed tasks. Failures are
    /// logged.
    pub async fn housekeeping(&self) {
        match self.cache.purge_expired().await {
            Ok(0) => tracing::debug!("Housekeeping: no expired cache entries"),
            Ok(deleted) => tracing::info!(deleted, "Housekeeping: purged expired cache entries"),
            Err(e) => tracing::error!(error = %e, "Housekeeping: cache purge failed"),
        }
        match self.queue.purge_completed(COMPLETED_TASK_RETENTION).await {
            Ok(0) => tracing::debug!("Housekeeping: no completed tasks to purge"),
            Ok(deleted) => tracing::info!(deleted, "Housekeeping: purged completed tasks"),
            Err(e) => tracing::error!(error = %e, "Housekeeping: task purge failed"),
        }
    }
}
