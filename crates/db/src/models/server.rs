//! Remote server rows.

use harvester_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `servers` table: one scan path on one remote server.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Server {
    pub id: DbId,
    pub host: String,
    pub port: i32,
    pub path: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub scanning: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a scan path.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateServer {
    pub host: String,
    pub port: Option<i32>,
    pub path: String,
    pub username: String,
    pub password: String,
    pub scanning: Option<bool>,
}
