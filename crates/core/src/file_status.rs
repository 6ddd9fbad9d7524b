//! File lifecycle state machine.
//!
//! Every transfer state change goes through [`transition`]. Workers never
//! assign a [`FileStatus`] directly; they describe what happened with a
//! [`FileEvent`] and persist whatever state the machine yields.
//!
//! ```text
//! (none)|NEW|DOWNLOADED_TO_MINIO|ERROR       --Discovered------> NEW
//! NEW|RETRY|DOWNLOADING|DOWNLOADED_TO_SERVER --DownloadStarted-> DOWNLOADING
//! DOWNLOADING                                --DownloadFinished> DOWNLOADED_TO_SERVER
//! NEW|DOWNLOADING|RETRY|DOWNLOADED_TO_SERVER --RetryScheduled--> RETRY
//! DOWNLOADED_TO_SERVER|RETRY                 --UploadFinished--> DOWNLOADED_TO_MINIO
//! any non-terminal                           --Failed----------> ERROR
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the `file_statuses` lookup table.
pub type StatusId = i16;

/// Transfer state of one file version. Discriminants match the seed data
/// of the `file_statuses` table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    New = 1,
    Downloading = 2,
    DownloadedToServer = 3,
    DownloadedToMinio = 4,
    Retry = 5,
    Error = 6,
}

impl FileStatus {
    pub const ALL: [FileStatus; 6] = [
        FileStatus::New,
        FileStatus::Downloading,
        FileStatus::DownloadedToServer,
        FileStatus::DownloadedToMinio,
        FileStatus::Retry,
        FileStatus::Error,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Resolve a database status ID. Returns `None` for unknown IDs.
    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Name stored in the `file_statuses.name` column.
    pub fn name(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Downloading => "downloading",
            Self::DownloadedToServer => "downloaded_to_server",
            Self::DownloadedToMinio => "downloaded_to_minio",
            Self::Retry => "retry",
            Self::Error => "error",
        }
    }

    /// No worker moves a file out of a terminal state. Only a new sighting
    /// by the scanner restarts the lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DownloadedToMinio | Self::Error)
    }
}

impl From<FileStatus> for StatusId {
    fn from(value: FileStatus) -> Self {
        value as StatusId
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that happened to a file, as reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// A download task picked up a new or changed file.
    Discovered,
    /// The file passed the stability check and the transfer began.
    DownloadStarted,
    /// The file landed in local staging.
    DownloadFinished,
    /// The current attempt failed and another one is scheduled.
    RetryScheduled,
    /// The staged file was written to object storage.
    UploadFinished,
    /// The retry budget is exhausted.
    Failed,
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::DownloadStarted => "download_started",
            Self::DownloadFinished => "download_finished",
            Self::RetryScheduled => "retry_scheduled",
            Self::UploadFinished => "upload_finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An event that is not allowed from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid file status transition: {event} from {}", .from.map_or("none", FileStatus::name))]
pub struct InvalidTransition {
    pub from: Option<FileStatus>,
    pub event: FileEvent,
}

/// Compute the next state for `event` applied to `current`.
///
/// `current` is `None` when the file has no status record yet.
pub fn transition(
    current: Option<FileStatus>,
    event: FileEvent,
) -> Result<FileStatus, InvalidTransition> {
    use FileEvent as E;
    use FileStatus as S;

    let next = match (current, event) {
        (None | Some(S::New | S::DownloadedToMinio | S::Error), E::Discovered) => S::New,
        // A reclaimed task restarts a download its crashed worker left behind.
        (
            Some(S::New | S::Retry | S::Downloading | S::DownloadedToServer),
            E::DownloadStarted,
        ) => S::Downloading,
        (Some(S::Downloading), E::DownloadFinished) => S::DownloadedToServer,
        (
            Some(S::New | S::Downloading | S::Retry | S::DownloadedToServer),
            E::RetryScheduled,
        ) => S::Retry,
        (Some(S::DownloadedToServer | S::Retry), E::UploadFinished) => S::DownloadedToMinio,
        (Some(s), E::Failed) if !s.is_terminal() => S::Error,
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}
