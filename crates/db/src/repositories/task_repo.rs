//! Repository for the `tasks` table.
//!
//! Tasks move pending -> running -> completed | failed. A reschedule puts a
//! running task back to pending with a later `run_at`. A running task whose
//! lease expired (worker crashed mid-run) is claimable again.
//!
//! `attempts` counts claims, so a run lost to a crash uses up an attempt
//! just like one that ended in a retry.

use harvester_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::status::TaskStatus;
use crate::models::task::QueuedTask;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, queue, payload, status_id, attempts, last_error, run_at, \
    locked_until, created_at, updated_at";

pub struct TaskRepo;

impl TaskRepo {
    /// Insert a pending task that becomes claimable after `delay_secs`.
    pub async fn enqueue(
        pool: &PgPool,
        queue: &str,
        payload: &serde_json::Value,
        delay_secs: f64,
    ) -> Result<QueuedTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (queue, payload, status_id, run_at) \
             VALUES ($1, $2, $3, NOW() + make_interval(secs => $4)) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedTask>(&query)
            .bind(queue)
            .bind(payload)
            .bind(TaskStatus::Pending.id())
            .bind(delay_secs.max(0.0))
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the next due task on `queue`, lease it for
    /// `lease_secs` and count the attempt. The returned row carries the
    /// incremented `attempts`.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same row.
    pub async fn claim_next(
        pool: &PgPool,
        queue: &str,
        lease_secs: f64,
    ) -> Result<Option<QueuedTask>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks \
             SET status_id = $2, attempts = attempts + 1, \
                 locked_until = NOW() + make_interval(secs => $3), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE queue = $1 \
                   AND ((status_id = $4 AND run_at <= NOW()) \
                     OR (status_id = $2 AND locked_until < NOW())) \
                 ORDER BY run_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedTask>(&query)
            .bind(queue)
            .bind(TaskStatus::Running.id())
            .bind(lease_secs)
            .bind(TaskStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    pub async fn complete(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET status_id = $2, locked_until = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(TaskStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Put a task back to pending, due after `delay_secs`.
    pub async fn reschedule(
        pool: &PgPool,
        id: DbId,
        delay_secs: f64,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks \
             SET status_id = $2, last_error = $3, \
                 run_at = NOW() + make_interval(secs => $4), locked_until = NULL, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(TaskStatus::Pending.id())
        .bind(reason)
        .bind(delay_secs.max(0.0))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Push the lease of a running task `lease_secs` into the future.
    /// Returns `false` when the task is no longer running.
    pub async fn extend_lease(pool: &PgPool, id: DbId, lease_secs: f64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET locked_until = NOW() + make_interval(secs => $3), updated_at = NOW() \
             WHERE id = $1 AND status_id = $2",
        )
        .bind(id)
        .bind(TaskStatus::Running.id())
        .bind(lease_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fail(pool: &PgPool, id: DbId, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks \
             SET status_id = $2, last_error = $3, locked_until = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(TaskStatus::Failed.id())
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<QueuedTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, QueuedTask>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Tasks on `queue` that are pending or running.
    pub async fn count_open(pool: &PgPool, queue: &str) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE queue = $1 AND status_id IN ($2, $3)",
        )
        .bind(queue)
        .bind(TaskStatus::Pending.id())
        .bind(TaskStatus::Running.id())
        .fetch_one(pool)
        .await?;
        Ok(count.0)
    }

    /// Delete completed tasks last touched before `cutoff`. Failed tasks are
    /// kept for inspection.
    pub async fn delete_completed_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE status_id = $1 AND updated_at < $2")
            .bind(TaskStatus::Completed.id())
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
