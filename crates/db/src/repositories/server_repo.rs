//! Repository for the `servers` table.

use harvester_core::types::DbId;
use sqlx::PgPool;

use crate::models::server::{CreateServer, Server};

/// Column list for `servers` queries.
const COLUMNS: &str = "id, host, port, path, username, password, scanning, created_at, updated_at";

/// Default SSH port when a row does not specify one.
const DEFAULT_PORT: i32 = 22;

/// Read access for the scan orchestrator, plus the inserts used when
/// seeding configuration.
pub struct ServerRepo;

impl ServerRepo {
    /// Register a scan path.
    pub async fn create(pool: &PgPool, input: &CreateServer) -> Result<Server, sqlx::Error> {
        let query = format!(
            "INSERT INTO servers (host, port, path, username, password, scanning) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Server>(&query)
            .bind(&input.host)
            .bind(input.port.unwrap_or(DEFAULT_PORT))
            .bind(&input.path)
            .bind(&input.username)
            .bind(&input.password)
            .bind(input.scanning.unwrap_or(true))
            .fetch_one(pool)
            .await
    }

    /// All rows with scanning enabled, oldest first.
    pub async fn list_scanning(pool: &PgPool) -> Result<Vec<Server>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM servers WHERE scanning ORDER BY id ASC");
        sqlx::query_as::<_, Server>(&query).fetch_all(pool).await
    }

    /// Enable or disable scanning. Returns `true` if the row exists.
    pub async fn set_scanning(pool: &PgPool, id: DbId, scanning: bool) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE servers SET scanning = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(scanning)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
