//! Upload worker: local staging -> object storage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use harvester_core::file_status::FileEvent;
use harvester_core::naming;
use harvester_core::retry::RetryPolicy;
use harvester_core::task::{TaskOutcome, UploadTask, QUEUE_UPLOAD};
use harvester_storage::{ObjectStore, StorageError};

use crate::error::PipelineError;
use crate::runner::TaskHandler;
use crate::store::{StatusDetail, StatusTracker};

/// Handler for the `upload` queue.
pub struct UploadWorker {
    store: Arc<dyn ObjectStore>,
    statuses: StatusTracker,
    retry: RetryPolicy,
    remove_staged: bool,
}

impl UploadWorker {
    pub fn new(store: Arc<dyn ObjectStore>, statuses: StatusTracker, retry: RetryPolicy) -> Self {
        Self {
            store,
            statuses,
            retry,
            remove_staged: false,
        }
    }

    /// Delete the staged copy once the object is stored.
    pub fn remove_staged_after_upload(mut self, remove: bool) -> Self {
        self.remove_staged = remove;
        self
    }

    /// Run one attempt (0-based) of `task`.
    pub async fn process(&self, task: &UploadTask, attempt: u32) -> TaskOutcome {
        let key = task.file_key();

        if let Err(e) = self.upload(task).await {
            tracing::warn!(
                bucket = %task.bucket_name,
                key = %task.object_key,
                filename = %task.filename,
                server_id = task.server_id,
                attempt,
                error = %e,
                "Upload attempt failed",
            );
            return self
                .statuses
                .settle_failure(
                    &key,
                    &self.retry,
                    attempt,
                    e.to_string(),
                    self.retry.failure_delay(attempt),
                )
                .await;
        }

        let object_path = naming::object_path(&task.bucket_name, &task.object_key);
        let detail = StatusDetail {
            object_path: Some(object_path.clone()),
            error_message: None,
            attempts: attempt,
        };
        match self.statuses.advance(&key, FileEvent::UploadFinished, detail).await {
            Ok(_) => {}
            Err(PipelineError::Transition(e)) => {
                tracing::warn!(
                    filename = %task.filename,
                    server_id = task.server_id,
                    "Object stored but status not advanced: {e}",
                );
            }
            Err(e) => {
                return self
                    .statuses
                    .settle_failure(
                        &key,
                        &self.retry,
                        attempt,
                        e.to_string(),
                        self.retry.failure_delay(attempt),
                    )
                    .await;
            }
        }

        tracing::info!(
            filename = %task.filename,
            server_id = task.server_id,
            object_path = %object_path,
            "File stored",
        );

        if self.remove_staged {
            if let Err(e) = tokio::fs::remove_file(&task.local_path).await {
                tracing::warn!(
                    local_path = %task.local_path,
                    error = %e,
                    "Failed to remove staged file",
                );
            }
        }
        TaskOutcome::Completed
    }

    async fn upload(&self, task: &UploadTask) -> Result<(), StorageError> {
        self.store.ensure_bucket(&task.bucket_name).await?;
        self.store
            .put_file(&task.bucket_name, &task.object_key, Path::new(&task.local_path))
            .await
    }
}

#[async_trait]
impl TaskHandler for UploadWorker {
    type Task = UploadTask;

    fn queue(&self) -> &'static str {
        QUEUE_UPLOAD
    }

    async fn handle(&self, task: UploadTask, attempt: u32) -> TaskOutcome {
        self.process(&task, attempt).await
    }
}
