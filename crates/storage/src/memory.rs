//! In-process object store.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ObjectStore;

/// Buckets and objects held in memory.
///
/// Uploading into a bucket that was never ensured fails, as it does
/// against S3. `fail_next_uploads` injects upload failures.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    buckets_created: AtomicUsize,
    failing_uploads: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` uploads fail.
    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.lock().contains_key(bucket)
    }

    /// Number of buckets actually created (not counting no-op ensures).
    pub fn buckets_created(&self) -> usize {
        self.buckets_created.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock().get(bucket)?.get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Vec<u8>>>> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let mut buckets = self.lock();
        if !buckets.contains_key(bucket) {
            buckets.insert(bucket.to_string(), BTreeMap::new());
            self.buckets_created.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        let upload_err = |message: String| StorageError::Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            local_path: local_path.display().to_string(),
            message,
        };

        if self.take_injected_failure() {
            return Err(upload_err("injected failure".to_string()));
        }
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| upload_err(e.to_string()))?;

        let mut buckets = self.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| upload_err("NoSuchBucket".to_string()))?;
        objects.insert(key.to_string(), bytes);
        Ok(())
    }
}
