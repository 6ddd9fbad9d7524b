//! Queue runner.
//!
//! Polls one named queue every `poll_interval`, runs up to `concurrency`
//! handlers in parallel and applies each [`TaskOutcome`] back to the queue.
//! Claiming goes through [`TaskQueue::claim`], which never hands the same
//! task to two runners. While a handler runs, its lease is renewed every
//! `heartbeat_interval`, so long transfers are not reclaimed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::task::TaskOutcome;
use harvester_core::types::DbId;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::PipelineError;
use crate::queue::{ClaimedTask, TaskQueue};

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default lease renewal interval, well inside [`crate::queue::DEFAULT_LEASE`].
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Work performed for each task of one queue.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Payload type stored on the queue.
    type Task: DeserializeOwned + Send;

    /// Queue this handler consumes.
    fn queue(&self) -> &'static str;

    /// Run one attempt (0-based) of `task`.
    async fn handle(&self, task: Self::Task, attempt: u32) -> TaskOutcome;
}

/// Long-lived consumer of one queue.
pub struct QueueRunner<H: TaskHandler> {
    queue: Arc<dyn TaskQueue>,
    handler: Arc<H>,
    concurrency: usize,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl<H: TaskHandler> QueueRunner<H> {
    /// Create a runner with the default 1-second poll interval.
    pub fn new(queue: Arc<dyn TaskQueue>, handler: Arc<H>, concurrency: usize) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How often a running task's lease is renewed. Must be shorter than
    /// the queue's lease.
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval.max(Duration::from_millis(1));
        self
    }

    /// Run until `cancel` fires, then wait for in-flight tasks.
    pub async fn run(&self, cancel: CancellationToken) {
        let name = self.handler.queue();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let tracker = TaskTracker::new();
        let mut ticker = tokio::time::interval(self.poll_interval);

        tracing::info!(
            queue = name,
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Queue runner started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(queue = name, "Queue runner shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch(&permits, &tracker).await {
                        tracing::error!(queue = name, error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!(queue = name, "Queue runner stopped");
    }

    /// Claim tasks while permits are free and spawn a handler for each.
    async fn dispatch(
        &self,
        permits: &Arc<Semaphore>,
        tracker: &TaskTracker,
    ) -> Result<(), PipelineError> {
        let name = self.handler.queue();
        while let Ok(permit) = Arc::clone(permits).try_acquire_owned() {
            let Some(claimed) = self.queue.claim(name).await? else {
                break;
            };
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let heartbeat = self.heartbeat_interval;
            tracker.spawn(async move {
                execute(queue.as_ref(), handler.as_ref(), claimed, heartbeat).await;
                drop(permit);
            });
        }
        Ok(())
    }

    /// Process due tasks one by one until the queue has none left.
    /// Returns how many were processed.
    pub async fn drain(&self) -> Result<usize, PipelineError> {
        let mut processed = 0;
        while let Some(claimed) = self.queue.claim(self.handler.queue()).await? {
            execute(
                self.queue.as_ref(),
                self.handler.as_ref(),
                claimed,
                self.heartbeat_interval,
            )
            .await;
            processed += 1;
        }
        Ok(processed)
    }
}

async fn execute<H: TaskHandler>(
    queue: &dyn TaskQueue,
    handler: &H,
    claimed: ClaimedTask,
    heartbeat_interval: Duration,
) {
    let ClaimedTask {
        id,
        queue: name,
        payload,
        attempts,
    } = claimed;

    let task: H::Task = match serde_json::from_value(payload) {
        Ok(task) => task,
        Err(e) => {
            tracing::error!(task_id = id, queue = %name, error = %e, "Undecodable task payload");
            if let Err(e) = queue.fail(id, &format!("undecodable payload: {e}")).await {
                tracing::error!(
                    task_id = id,
                    queue = %name,
                    error = %e,
                    "Failed to mark task failed",
                );
            }
            return;
        }
    };

    let work = handler.handle(task, attempts);
    tokio::pin!(work);
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    let outcome = loop {
        tokio::select! {
            outcome = &mut work => break outcome,
            _ = heartbeat.tick() => {
                if let Err(e) = queue.renew(id).await {
                    tracing::warn!(task_id = id, queue = %name, error = %e, "Lease renewal failed");
                }
            }
        }
    };
    if let Err(e) = apply_outcome(queue, id, &outcome).await {
        tracing::error!(
            task_id = id,
            queue = %name,
            error = %e,
            "Failed to apply task outcome",
        );
        return;
    }

    match &outcome {
        TaskOutcome::Completed => {
            tracing::debug!(task_id = id, queue = %name, attempt = attempts, "Task completed");
        }
        TaskOutcome::Skipped { reason } => {
            tracing::debug!(task_id = id, queue = %name, reason = %reason, "Task skipped");
        }
        TaskOutcome::Retry { delay, reason } => {
            tracing::info!(
                task_id = id,
                queue = %name,
                attempt = attempts,
                delay_secs = delay.as_secs(),
                reason = %reason,
                "Task rescheduled",
            );
        }
        TaskOutcome::Failed { reason } => {
            tracing::error!(
                task_id = id,
                queue = %name,
                attempt = attempts,
                reason = %reason,
                "Task failed permanently",
            );
        }
    }
}

async fn apply_outcome(
    queue: &dyn TaskQueue,
    id: DbId,
    outcome: &TaskOutcome,
) -> Result<(), PipelineError> {
    match outcome {
        TaskOutcome::Completed | TaskOutcome::Skipped { .. } => queue.complete(id).await,
        TaskOutcome::Retry { delay, reason } => queue.retry(id, *delay, reason).await,
        TaskOutcome::Failed { reason } => queue.fail(id, reason).await,
    }
}
