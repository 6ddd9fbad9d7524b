/// Failures talking to object storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Bucket lookup or creation failed.
    #[error("Bucket {bucket}: {message}")]
    Bucket { bucket: String, message: String },

    #[error("Upload of {local_path} to {bucket}/{key} failed: {message}")]
    Upload {
        bucket: String,
        key: String,
        local_path: String,
        message: String,
    },
}
