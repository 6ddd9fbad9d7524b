//! Change cache: the last observed listing of each remote directory.
//!
//! A scan diffs the fresh listing against the cache to find new or changed
//! files, then merges the listing back in.

use std::time::Duration;

use async_trait::async_trait;
use harvester_core::naming;
use harvester_core::task::RemoteFile;
use harvester_db::models::scan_cache::CachedListing;
use harvester_db::repositories::ScanCacheRepo;
use sqlx::PgPool;

use crate::error::PipelineError;

/// Time a cache entry survives without being refreshed.
pub const CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[async_trait]
pub trait ChangeCache: Send + Sync {
    /// Cached listing of `host:path`. Empty on miss or expiry.
    async fn get(&self, host: &str, path: &str) -> Result<CachedListing, PipelineError>;

    /// Merge `listing` into the entry, overwriting the tuple of every listed
    /// file, and reset the entry's expiry. Names missing from `listing` are
    /// kept until the entry expires.
    async fn put(&self, host: &str, path: &str, listing: &[RemoteFile])
        -> Result<(), PipelineError>;

    /// Remove `filenames` from the entry of `host:path`, so the next diff
    /// reports them as new.
    async fn forget(&self, host: &str, path: &str, filenames: &[String])
        -> Result<(), PipelineError>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, PipelineError>;
}

/// Files in `listing` that are absent from `cached` or differ in size or
/// mtime, in listing order.
pub fn diff(listing: &[RemoteFile], cached: &CachedListing) -> Vec<RemoteFile> {
    listing
        .iter()
        .filter(|file| cached.get(&file.filename) != Some(&file.meta()))
        .cloned()
        .collect()
}

/// Filename to metadata map of a listing. A later duplicate name wins.
pub fn to_cached(listing: &[RemoteFile]) -> CachedListing {
    listing
        .iter()
        .map(|file| (file.filename.clone(), file.meta()))
        .collect()
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`ChangeCache`] stored in the `scan_cache` table.
#[derive(Clone)]
pub struct PgChangeCache {
    pool: PgPool,
    ttl: Duration,
}

impl PgChangeCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl: CACHE_TTL,
        }
    }
}

#[async_trait]
impl ChangeCache for PgChangeCache {
    async fn get(&self, host: &str, path: &str) -> Result<CachedListing, PipelineError> {
        let key = naming::cache_key(host, path);
        let entry = ScanCacheRepo::get(&self.pool, &key).await?;
        Ok(entry.map(|e| e.files.0).unwrap_or_default())
    }

    async fn put(
        &self,
        host: &str,
        path: &str,
        listing: &[RemoteFile],
    ) -> Result<(), PipelineError> {
        let key = naming::cache_key(host, path);
        ScanCacheRepo::put(&self.pool, &key, &to_cached(listing), self.ttl.as_secs_f64()).await?;
        Ok(())
    }

    async fn forget(
        &self,
        host: &str,
        path: &str,
        filenames: &[String],
    ) -> Result<(), PipelineError> {
        let key = naming::cache_key(host, path);
        ScanCacheRepo::forget(&self.pool, &key, filenames).await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, PipelineError> {
        Ok(ScanCacheRepo::delete_expired(&self.pool).await?)
    }
}
