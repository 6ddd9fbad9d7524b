//! File status rows.

use harvester_core::file_status::{FileStatus, StatusId};
use harvester_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `files` table. One row per `(server_id, filename, size)`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    pub id: DbId,
    pub server_id: DbId,
    pub filename: String,
    pub size: i64,
    pub status_id: StatusId,
    pub object_path: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl FileRecord {
    /// Decoded status, `None` if the row carries an unknown ID.
    pub fn status(&self) -> Option<FileStatus> {
        FileStatus::from_id(self.status_id)
    }
}

/// DTO for [`FileRepo::upsert_status`](crate::repositories::FileRepo::upsert_status).
///
/// Every column is overwritten on conflict; a `None` clears the column.
#[derive(Debug, Clone)]
pub struct UpsertFileStatus {
    pub server_id: DbId,
    pub filename: String,
    pub size: i64,
    pub status_id: StatusId,
    pub object_path: Option<String>,
    pub error_message: Option<String>,
    pub attempts: i32,
}
