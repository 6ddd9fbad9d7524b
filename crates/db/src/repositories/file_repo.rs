//! Repository for the `files` table.
//!
//! Status transitions are validated by the caller; this layer only
//! persists the outcome.

use harvester_core::file_status::FileStatus;
use harvester_core::types::DbId;
use sqlx::PgPool;

use crate::models::file::{FileRecord, UpsertFileStatus};

/// Column list for `files` queries.
const COLUMNS: &str = "\
    id, server_id, filename, size, status_id, object_path, error_message, \
    attempts, created_at, updated_at";

/// Maximum page size for status listings.
const MAX_LIMIT: i64 = 1000;

pub struct FileRepo;

impl FileRepo {
    /// Insert or overwrite the status record for `(server_id, filename, size)`.
    pub async fn upsert_status(
        pool: &PgPool,
        input: &UpsertFileStatus,
    ) -> Result<FileRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO files \
                 (server_id, filename, size, status_id, object_path, error_message, attempts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (server_id, filename, size) DO UPDATE SET \
                 status_id = EXCLUDED.status_id, \
                 object_path = EXCLUDED.object_path, \
                 error_message = EXCLUDED.error_message, \
                 attempts = EXCLUDED.attempts, \
                 updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(input.server_id)
            .bind(&input.filename)
            .bind(input.size)
            .bind(input.status_id)
            .bind(&input.object_path)
            .bind(&input.error_message)
            .bind(input.attempts)
            .fetch_one(pool)
            .await
    }

    /// Look up a record by its natural key.
    pub async fn find_by_key(
        pool: &PgPool,
        server_id: DbId,
        filename: &str,
        size: i64,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM files \
             WHERE server_id = $1 AND filename = $2 AND size = $3"
        );
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(server_id)
            .bind(filename)
            .bind(size)
            .fetch_optional(pool)
            .await
    }

    /// Most recently updated records in `status`, capped at 1000.
    pub async fn list_by_status(
        pool: &PgPool,
        status: FileStatus,
        limit: i64,
    ) -> Result<Vec<FileRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM files WHERE status_id = $1 \
             ORDER BY updated_at DESC, id DESC LIMIT $2"
        );
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(status.id())
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }
}
