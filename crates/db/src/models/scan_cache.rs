//! Change cache rows.

use std::collections::BTreeMap;

use harvester_core::task::FileMeta;
use harvester_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::FromRow;

/// Filename to metadata mapping stored in `scan_cache.files`.
pub type CachedListing = BTreeMap<String, FileMeta>;

/// A row from the `scan_cache` table.
#[derive(Debug, Clone, FromRow)]
pub struct ScanCacheEntry {
    pub cache_key: String,
    pub files: Json<CachedListing>,
    pub expires_at: Timestamp,
    pub updated_at: Timestamp,
}
