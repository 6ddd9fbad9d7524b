//! File status records and the servers to scan.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::connection::ConnectionIdentity;
use harvester_core::error::CoreError;
use harvester_core::file_status::{transition, FileEvent, FileStatus};
use harvester_core::retry::RetryPolicy;
use harvester_core::task::{FileKey, TaskOutcome};
use harvester_core::types::DbId;
use harvester_db::models::file::UpsertFileStatus;
use harvester_db::models::server::Server;
use harvester_db::repositories::{FileRepo, ServerRepo};
use sqlx::PgPool;

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Status store
// ---------------------------------------------------------------------------

/// Columns written alongside a status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusDetail {
    pub object_path: Option<String>,
    pub error_message: Option<String>,
    /// Attempts used so far.
    pub attempts: u32,
}

impl StatusDetail {
    pub fn error(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            error_message: Some(message.into()),
            attempts,
            ..Default::default()
        }
    }
}

/// Persistence of file status records, keyed by [`FileKey`].
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn current(&self, key: &FileKey) -> Result<Option<FileStatus>, PipelineError>;

    /// Insert or overwrite the record for `key`.
    async fn record(
        &self,
        key: &FileKey,
        status: FileStatus,
        detail: &StatusDetail,
    ) -> Result<(), PipelineError>;
}

/// Applies [`FileEvent`]s to records through the transition table.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Current status of `key`, `None` when no record exists.
    pub async fn current(&self, key: &FileKey) -> Result<Option<FileStatus>, PipelineError> {
        self.store.current(key).await
    }

    /// Read the current status, apply `event` and write the result.
    ///
    /// An invalid transition is returned as
    /// [`PipelineError::Transition`] and nothing is written.
    ///
    /// The read and the write are separate calls. Two tasks advancing the
    /// same key at once can both pass the check, and the later write wins,
    /// so rejecting duplicate discoveries is best-effort.
    pub async fn advance(
        &self,
        key: &FileKey,
        event: FileEvent,
        detail: StatusDetail,
    ) -> Result<FileStatus, PipelineError> {
        let current = self.store.current(key).await?;
        let next = transition(current, event)?;
        self.store.record(key, next, &detail).await?;
        tracing::debug!(
            server_id = key.server_id,
            filename = %key.filename,
            size = key.size,
            from = current.map_or("none", FileStatus::name),
            to = next.name(),
            "File status advanced",
        );
        Ok(next)
    }

    /// Record a failed `attempt` and decide what happens to the task.
    ///
    /// While the budget allows, the record moves to RETRY and the task is
    /// rescheduled after `delay`. Otherwise the record moves to ERROR and
    /// the task fails. Status write errors are logged; they never change
    /// the outcome.
    pub async fn settle_failure(
        &self,
        key: &FileKey,
        policy: &RetryPolicy,
        attempt: u32,
        reason: String,
        delay: Duration,
    ) -> TaskOutcome {
        let detail = StatusDetail::error(reason.clone(), attempt.saturating_add(1));
        let (event, outcome) = if policy.can_retry(attempt) {
            (FileEvent::RetryScheduled, TaskOutcome::retry(delay, reason))
        } else {
            (FileEvent::Failed, TaskOutcome::failed(reason))
        };

        if let Err(e) = self.advance(key, event, detail).await {
            tracing::warn!(
                server_id = key.server_id,
                filename = %key.filename,
                attempt,
                error = %e,
                "Failed to record {event}",
            );
        }
        outcome
    }
}

pub(crate) fn db_size(size: u64) -> Result<i64, PipelineError> {
    i64::try_from(size).map_err(|_| PipelineError::size_overflow(size))
}

/// [`StatusStore`] over the `files` table.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn current(&self, key: &FileKey) -> Result<Option<FileStatus>, PipelineError> {
        let record =
            FileRepo::find_by_key(&self.pool, key.server_id, &key.filename, db_size(key.size)?)
                .await?;
        match record {
            None => Ok(None),
            Some(r) => r.status().map(Some).ok_or_else(|| {
                PipelineError::Core(CoreError::Internal(format!(
                    "File {} has unknown status_id {}",
                    r.id, r.status_id
                )))
            }),
        }
    }

    async fn record(
        &self,
        key: &FileKey,
        status: FileStatus,
        detail: &StatusDetail,
    ) -> Result<(), PipelineError> {
        let input = UpsertFileStatus {
            server_id: key.server_id,
            filename: key.filename.clone(),
            size: db_size(key.size)?,
            status_id: status.id(),
            object_path: detail.object_path.clone(),
            error_message: detail.error_message.clone(),
            attempts: i32::try_from(detail.attempts).unwrap_or(i32::MAX),
        };
        FileRepo::upsert_status(&self.pool, &input).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server source
// ---------------------------------------------------------------------------

/// One configured scan path, as read from the `servers` table.
#[derive(Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub server_id: DbId,
    pub host: String,
    pub port: i32,
    pub path: String,
    pub username: String,
    pub password: String,
}

impl ScanTarget {
    pub fn identity(&self) -> Result<ConnectionIdentity, CoreError> {
        ConnectionIdentity::from_parts(&self.host, self.port, &self.username, &self.password)
    }
}

impl std::fmt::Debug for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanTarget")
            .field("server_id", &self.server_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl From<Server> for ScanTarget {
    fn from(server: Server) -> Self {
        Self {
            server_id: server.id,
            host: server.host,
            port: server.port,
            path: server.path,
            username: server.username,
            password: server.password,
        }
    }
}

/// Source of the scan paths with scanning enabled.
#[async_trait]
pub trait ServerSource: Send + Sync {
    async fn active_servers(&self) -> Result<Vec<ScanTarget>, PipelineError>;
}

#[derive(Clone)]
pub struct PgServerSource {
    pool: PgPool,
}

impl PgServerSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerSource for PgServerSource {
    async fn active_servers(&self) -> Result<Vec<ScanTarget>, PipelineError> {
        let servers = ServerRepo::list_scanning(&self.pool).await?;
        Ok(servers.into_iter().map(ScanTarget::from).collect())
    }
}
