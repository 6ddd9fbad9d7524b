//! Queued task rows.

use harvester_core::file_status::StatusId;
use harvester_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueuedTask {
    pub id: DbId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status_id: StatusId,
    /// Runs that ended in a reschedule.
    pub attempts: i32,
    pub last_error: Option<String>,
    pub run_at: Timestamp,
    /// Lease end while running. A running task past its lease is claimable
    /// again.
    pub locked_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
