//! Download worker: remote file -> local staging.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use harvester_core::file_status::FileEvent;
use harvester_core::naming;
use harvester_core::retry::RetryPolicy;
use harvester_core::task::{
    DownloadTask, FileKey, TaskOutcome, UploadTask, QUEUE_DOWNLOAD, QUEUE_UPLOAD,
};
use harvester_remote::{
    ensure_staging_dir, staging_dir, RemoteConnector, RemoteFileService, DEFAULT_SETTLE_DELAY,
};

use crate::error::PipelineError;
use crate::queue::{enqueue_task, TaskQueue};
use crate::runner::TaskHandler;
use crate::store::{StatusDetail, StatusTracker};

/// Reason recorded when a file fails its stability check.
const UNSTABLE_REASON: &str = "file is still changing";

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Root of the local staging tree.
    pub staging_root: PathBuf,
    /// Wait between the two stats of the stability check.
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
}

impl DownloadSettings {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            retry: RetryPolicy::default(),
        }
    }
}

/// How far one attempt got.
#[derive(Debug)]
enum DownloadStep {
    /// Copied into staging and handed to the upload queue.
    Fetched,
    /// Size or mtime moved during the settle delay.
    Unstable,
}

/// Handler for the `download` queue.
pub struct DownloadWorker {
    connector: Arc<dyn RemoteConnector>,
    statuses: StatusTracker,
    queue: Arc<dyn TaskQueue>,
    settings: DownloadSettings,
}

impl DownloadWorker {
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        statuses: StatusTracker,
        queue: Arc<dyn TaskQueue>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            connector,
            statuses,
            queue,
            settings,
        }
    }

    /// Run one attempt (0-based) of `task`.
    pub async fn process(&self, task: &DownloadTask, attempt: u32) -> TaskOutcome {
        let key = task.file_key();

        // Later attempts resume the record they left behind. If the first
        // attempt never managed to create it, discover the file now.
        let discover = if attempt == 0 {
            true
        } else {
            match self.statuses.current(&key).await {
                Ok(None) => true,
                Ok(Some(status)) if status.is_terminal() => {
                    tracing::info!(
                        host = %task.host,
                        filename = %task.file.filename,
                        server_id = task.server_id,
                        status = status.name(),
                        "Download already settled",
                    );
                    return TaskOutcome::skipped(format!("file already {}", status.name()));
                }
                Ok(Some(_)) => false,
                Err(e) => {
                    return self.give_up_or_retry(&key, task, attempt, e.to_string()).await;
                }
            }
        };
        if discover {
            match self
                .statuses
                .advance(&key, FileEvent::Discovered, StatusDetail::default())
                .await
            {
                Ok(_) => {}
                Err(PipelineError::Transition(e)) => {
                    tracing::info!(
                        host = %task.host,
                        filename = %task.file.filename,
                        server_id = task.server_id,
                        "Discarding duplicate download: {e}",
                    );
                    return TaskOutcome::skipped(e.to_string());
                }
                Err(e) => {
                    return self.give_up_or_retry(&key, task, attempt, e.to_string()).await;
                }
            }
        }

        let session = self.connector.session(&task.identity());
        let result = self.attempt(session.as_ref(), task, &key, attempt).await;
        session.disconnect().await;

        match result {
            Ok(DownloadStep::Fetched) => TaskOutcome::Completed,
            Ok(DownloadStep::Unstable) => {
                tracing::info!(
                    host = %task.host,
                    path = %task.remote_path,
                    filename = %task.file.filename,
                    attempt,
                    "File still changing, rescheduling",
                );
                self.statuses
                    .settle_failure(
                        &key,
                        &self.settings.retry,
                        attempt,
                        UNSTABLE_REASON.to_string(),
                        self.settings.retry.unstable_delay(attempt),
                    )
                    .await
            }
            Err(e) => self.give_up_or_retry(&key, task, attempt, e.to_string()).await,
        }
    }

    async fn give_up_or_retry(
        &self,
        key: &FileKey,
        task: &DownloadTask,
        attempt: u32,
        reason: String,
    ) -> TaskOutcome {
        tracing::warn!(
            host = %task.host,
            path = %task.remote_path,
            filename = %task.file.filename,
            server_id = task.server_id,
            attempt,
            error = %reason,
            "Download attempt failed",
        );
        self.statuses
            .settle_failure(
                key,
                &self.settings.retry,
                attempt,
                reason,
                self.settings.retry.failure_delay(attempt),
            )
            .await
    }

    async fn attempt(
        &self,
        session: &dyn RemoteFileService,
        task: &DownloadTask,
        key: &FileKey,
        attempt: u32,
    ) -> Result<DownloadStep, PipelineError> {
        let filename = task.file.filename.as_str();
        session.connect().await?;

        if !session
            .is_stable(&task.remote_path, filename, self.settings.settle_delay)
            .await?
        {
            return Ok(DownloadStep::Unstable);
        }

        let attempts = StatusDetail {
            attempts: attempt,
            ..Default::default()
        };
        self.statuses
            .advance(key, FileEvent::DownloadStarted, attempts.clone())
            .await?;

        let today = today();
        let dir = staging_dir(&self.settings.staging_root, &task.host, &task.remote_path, today);
        ensure_staging_dir(&dir).await?;
        let local_path = dir.join(filename);

        let bytes = session
            .fetch(&task.remote_path, filename, &local_path)
            .await?;
        tracing::info!(
            host = %task.host,
            path = %task.remote_path,
            filename,
            bytes,
            local_path = %local_path.display(),
            "File downloaded",
        );

        self.statuses
            .advance(key, FileEvent::DownloadFinished, attempts)
            .await?;

        let upload = UploadTask {
            server_id: task.server_id,
            filename: filename.to_string(),
            size: task.file.size,
            local_path: local_path.to_string_lossy().into_owned(),
            object_key: naming::object_key(&task.remote_path, today, filename),
            bucket_name: naming::bucket_name(&task.host),
        };
        enqueue_task(self.queue.as_ref(), QUEUE_UPLOAD, &upload).await?;

        Ok(DownloadStep::Fetched)
    }
}

/// Date used for staging directories and object keys.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[async_trait]
impl TaskHandler for DownloadWorker {
    type Task = DownloadTask;

    fn queue(&self) -> &'static str {
        QUEUE_DOWNLOAD
    }

    async fn handle(&self, task: DownloadTask, attempt: u32) -> TaskOutcome {
        self.process(&task, attempt).await
    }
}
