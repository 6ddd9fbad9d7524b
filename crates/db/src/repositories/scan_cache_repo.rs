//! Repository for the `scan_cache` table.

use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::scan_cache::{CachedListing, ScanCacheEntry};

const COLUMNS: &str = "cache_key, files, expires_at, updated_at";

pub struct ScanCacheRepo;

impl ScanCacheRepo {
    /// Live entry for `cache_key`. Expired rows read as absent.
    pub async fn get(
        pool: &PgPool,
        cache_key: &str,
    ) -> Result<Option<ScanCacheEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM scan_cache WHERE cache_key = $1 AND expires_at > NOW()"
        );
        sqlx::query_as::<_, ScanCacheEntry>(&query)
            .bind(cache_key)
            .fetch_optional(pool)
            .await
    }

    /// Merge `files` into the entry and push its expiry `ttl_secs` out.
    ///
    /// Names already cached but absent from `files` are kept. An expired
    /// row is replaced rather than merged into.
    pub async fn put(
        pool: &PgPool,
        cache_key: &str,
        files: &CachedListing,
        ttl_secs: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO scan_cache (cache_key, files, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
             ON CONFLICT (cache_key) DO UPDATE SET \
                 files = CASE WHEN scan_cache.expires_at > NOW() \
                              THEN scan_cache.files || EXCLUDED.files \
                              ELSE EXCLUDED.files END, \
                 expires_at = EXCLUDED.expires_at, \
                 updated_at = NOW()",
        )
        .bind(cache_key)
        .bind(Json(files))
        .bind(ttl_secs)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop `filenames` from the entry so the next scan reports them again.
    pub async fn forget(
        pool: &PgPool,
        cache_key: &str,
        filenames: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scan_cache SET files = files - $2::text[], updated_at = NOW() \
             WHERE cache_key = $1",
        )
        .bind(cache_key)
        .bind(filenames)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Remove expired rows. Returns the number deleted.
    pub async fn delete_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM scan_cache WHERE expires_at <= NOW()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
