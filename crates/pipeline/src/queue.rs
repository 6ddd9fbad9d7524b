//! Durable task queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harvester_core::types::DbId;
use harvester_db::repositories::TaskRepo;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::PipelineError;

/// How long a claimed task stays invisible to other workers.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30 * 60);

/// A task taken off a queue by one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub id: DbId,
    pub queue: String,
    pub payload: serde_json::Value,
    /// 0-based index of this run. Every earlier claim counts, including
    /// runs lost to a crashed worker.
    pub attempts: u32,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a task that becomes claimable after `delay`.
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<DbId, PipelineError>;

    /// Take the next due task on `queue`, if any. A running task whose
    /// lease expired is due again.
    async fn claim(&self, queue: &str) -> Result<Option<ClaimedTask>, PipelineError>;

    /// Extend the lease of a running task.
    async fn renew(&self, id: DbId) -> Result<(), PipelineError>;

    async fn complete(&self, id: DbId) -> Result<(), PipelineError>;

    /// Make the task due again after `delay`.
    async fn retry(&self, id: DbId, delay: Duration, reason: &str) -> Result<(), PipelineError>;

    async fn fail(&self, id: DbId, reason: &str) -> Result<(), PipelineError>;

    /// Tasks on `queue` that are waiting or running.
    async fn pending_count(&self, queue: &str) -> Result<u64, PipelineError>;

    /// Delete completed tasks older than `age`. Returns how many were removed.
    async fn purge_completed(&self, age: Duration) -> Result<u64, PipelineError>;
}

/// Serialize `task` and enqueue it on `queue` with no delay.
pub async fn enqueue_task<T: Serialize + Sync>(
    queue: &dyn TaskQueue,
    name: &str,
    task: &T,
) -> Result<DbId, PipelineError> {
    let payload = serde_json::to_value(task)?;
    queue.enqueue(name, payload, Duration::ZERO).await
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`TaskQueue`] over the `tasks` table with `SKIP LOCKED` claiming.
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<DbId, PipelineError> {
        let task = TaskRepo::enqueue(&self.pool, queue, &payload, delay.as_secs_f64()).await?;
        Ok(task.id)
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedTask>, PipelineError> {
        let claimed = TaskRepo::claim_next(&self.pool, queue, self.lease.as_secs_f64()).await?;
        Ok(claimed.map(|task| ClaimedTask {
            id: task.id,
            queue: task.queue,
            payload: task.payload,
            attempts: u32::try_from(task.attempts.saturating_sub(1)).unwrap_or(0),
        }))
    }

    async fn renew(&self, id: DbId) -> Result<(), PipelineError> {
        if !TaskRepo::extend_lease(&self.pool, id, self.lease.as_secs_f64()).await? {
            tracing::debug!(task_id = id, "Lease not renewed, task no longer running");
        }
        Ok(())
    }

    async fn complete(&self, id: DbId) -> Result<(), PipelineError> {
        Ok(TaskRepo::complete(&self.pool, id).await?)
    }

    async fn retry(&self, id: DbId, delay: Duration, reason: &str) -> Result<(), PipelineError> {
        Ok(TaskRepo::reschedule(&self.pool, id, delay.as_secs_f64(), reason).await?)
    }

    async fn fail(&self, id: DbId, reason: &str) -> Result<(), PipelineError> {
        Ok(TaskRepo::fail(&self.pool, id, reason).await?)
    }

    async fn pending_count(&self, queue: &str) -> Result<u64, PipelineError> {
        let count = TaskRepo::count_open(&self.pool, queue).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn purge_completed(&self, age: Duration) -> Result<u64, PipelineError> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        Ok(TaskRepo::delete_completed_before(&self.pool, cutoff).await?)
    }
}
