use harvester_core::error::CoreError;
use harvester_core::file_status::InvalidTransition;
use harvester_remote::RemoteError;
use harvester_storage::StorageError;

/// Errors raised inside the pipeline.
///
/// Workers never let these escape a task: they are recorded on the file's
/// status record and turned into a task outcome.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Task payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Staging error: {0}")]
    Staging(#[from] std::io::Error),
}

impl PipelineError {
    /// Byte sizes are unsigned in memory and BIGINT in the database.
    pub(crate) fn size_overflow(size: u64) -> Self {
        Self::Core(CoreError::Validation(format!(
            "File size {size} does not fit in a BIGINT"
        )))
    }
}
