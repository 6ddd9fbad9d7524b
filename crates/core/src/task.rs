//! Messages exchanged over the scan, download and upload work queues.
//!
//! Payloads are stored as JSON in the `tasks` table, so every field here is
//! part of the queue contract. Renaming a field strands in-flight tasks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionIdentity;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// Queue consumed by the scan orchestrator.
pub const QUEUE_SCAN: &str = "scan";
/// Queue consumed by the download worker.
pub const QUEUE_DOWNLOAD: &str = "download";
/// Queue consumed by the upload worker.
pub const QUEUE_UPLOAD: &str = "upload";

// ---------------------------------------------------------------------------
// File metadata
// ---------------------------------------------------------------------------

/// Size and modification time, the pair used for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMeta {
    /// Size in bytes.
    pub size: u64,
    /// Modification time, unix seconds.
    pub mtime: i64,
}

/// A file as observed in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    pub filename: String,
    pub size: u64,
    pub mtime: i64,
}

impl RemoteFile {
    pub fn meta(&self) -> FileMeta {
        FileMeta {
            size: self.size,
            mtime: self.mtime,
        }
    }
}

// ---------------------------------------------------------------------------
// Task payloads
// ---------------------------------------------------------------------------

/// Trigger for one full scan of every active server. Carries no data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTask {}

/// One candidate file to pull from a remote server into staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_path: String,
    pub file: RemoteFile,
    pub server_id: DbId,
}

impl DownloadTask {
    /// Build a task for `file` found under `remote_path` on the connection
    /// described by `identity`.
    pub fn new(
        identity: &ConnectionIdentity,
        remote_path: &str,
        file: RemoteFile,
        server_id: DbId,
    ) -> Self {
        Self {
            host: identity.host.clone(),
            port: identity.port,
            username: identity.username.clone(),
            password: identity.password.clone(),
            remote_path: remote_path.to_string(),
            file,
            server_id,
        }
    }

    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn file_key(&self) -> FileKey {
        FileKey {
            server_id: self.server_id,
            filename: self.file.filename.clone(),
            size: self.file.size,
        }
    }
}

/// One staged file to push into object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub server_id: DbId,
    pub filename: String,
    pub size: u64,
    pub local_path: String,
    pub object_key: String,
    pub bucket_name: String,
}

impl UploadTask {
    pub fn file_key(&self) -> FileKey {
        FileKey {
            server_id: self.server_id,
            filename: self.filename.clone(),
            size: self.size,
        }
    }
}

/// Natural key of a file status record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    pub server_id: DbId,
    pub filename: String,
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a task handler asks the queue runtime to do with its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Work finished; drop the task.
    Completed,
    /// Transient failure; run the same task again after `delay`.
    Retry { delay: Duration, reason: String },
    /// Terminal failure; the retry budget is exhausted or the task is unusable.
    Failed { reason: String },
    /// Nothing to do (e.g. another task already owns the file).
    Skipped { reason: String },
}

impl TaskOutcome {
    pub fn retry(delay: Duration, reason: impl Into<String>) -> Self {
        Self::Retry {
            delay,
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}
