//! Object storage for staged files.
//!
//! [`ObjectStore`] is the seam the upload worker talks to. [`S3ObjectStore`]
//! targets any S3-compatible endpoint (MinIO in production);
//! [`MemoryObjectStore`] keeps objects in process for tests.

pub mod error;
pub mod memory;
pub mod s3;

use std::path::Path;

use async_trait::async_trait;

pub use error::StorageError;
pub use memory::MemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};

/// Bucket/object operations needed by the upload worker.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Make sure `bucket` exists. Idempotent; losing a creation race to
    /// ourselves is success.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Upload the file at `local_path` as `bucket/key`, replacing any
    /// existing object.
    async fn put_file(&self, bucket: &str, key: &str, local_path: &Path)
        -> Result<(), StorageError>;
}
