//! Integration tests for the repository layer.

use std::collections::BTreeMap;

use harvester_core::file_status::FileStatus;
use harvester_core::task::FileMeta;
use harvester_db::models::file::UpsertFileStatus;
use harvester_db::models::server::CreateServer;
use harvester_db::models::status::TaskStatus;
use harvester_db::repositories::{FileRepo, ScanCacheRepo, ServerRepo, TaskRepo};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_server(host: &str, path: &str) -> CreateServer {
    CreateServer {
        host: host.to_string(),
        port: None,
        path: path.to_string(),
        username: "ingest".to_string(),
        password: "secret".to_string(),
        scanning: None,
    }
}

fn upsert(server_id: i64, status: FileStatus) -> UpsertFileStatus {
    UpsertFileStatus {
        server_id,
        filename: "report.csv".to_string(),
        size: 100,
        status_id: status.id(),
        object_path: None,
        error_message: None,
        attempts: 0,
    }
}

fn listing(entries: &[(&str, u64, i64)]) -> BTreeMap<String, FileMeta> {
    entries
        .iter()
        .map(|(name, size, mtime)| {
            (
                name.to_string(),
                FileMeta {
                    size: *size,
                    mtime: *mtime,
                },
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_lookup_tables_seeded(pool: PgPool) {
    harvester_db::health_check(&pool).await.unwrap();

    for table in ["file_statuses", "task_statuses"] {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert!(count.0 > 0, "{table} should have seed data, got 0 rows");
    }
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_list_scanning_skips_disabled(pool: PgPool) {
    let a = ServerRepo::create(&pool, &new_server("10.0.0.5", "/a")).await.unwrap();
    let b = ServerRepo::create(&pool, &new_server("10.0.0.5", "/b")).await.unwrap();
    assert_eq!(a.port, 22);

    assert!(ServerRepo::set_scanning(&pool, b.id, false).await.unwrap());

    let active = ServerRepo::list_scanning(&pool).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, a.id);
    assert_eq!(active[0].path, "/a");
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_upsert_keeps_one_row_per_key(pool: PgPool) {
    let first = FileRepo::upsert_status(&pool, &upsert(1, FileStatus::New)).await.unwrap();

    let mut done = upsert(1, FileStatus::DownloadedToMinio);
    done.object_path = Some("server-h//a/2024-01-01/report.csv".to_string());
    let second = FileRepo::upsert_status(&pool, &done).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.status(), Some(FileStatus::DownloadedToMinio));
    assert_eq!(second.object_path.as_deref(), done.object_path.as_deref());

    let found = FileRepo::find_by_key(&pool, 1, "report.csv", 100)
        .await
        .unwrap()
        .expect("record exists");
    assert_eq!(found.id, first.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_same_name_different_size_is_separate_record(pool: PgPool) {
    let a = FileRepo::upsert_status(&pool, &upsert(1, FileStatus::New)).await.unwrap();
    let mut other = upsert(1, FileStatus::New);
    other.size = 200;
    let b = FileRepo::upsert_status(&pool, &other).await.unwrap();
    assert_ne!(a.id, b.id);

    let new = FileRepo::list_by_status(&pool, FileStatus::New, 10).await.unwrap();
    assert_eq!(new.len(), 2);
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_claim_is_exclusive(pool: PgPool) {
    let payload = serde_json::json!({});
    TaskRepo::enqueue(&pool, "download", &payload, 0.0).await.unwrap();

    let claimed = TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap();
    assert!(claimed.is_some());
    assert_eq!(claimed.unwrap().status_id, TaskStatus::Running.id());

    let again = TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap();
    assert!(again.is_none(), "running task must not be claimed twice");
}

#[sqlx::test(migrations = "./migrations")]
async fn test_delayed_task_not_claimable_yet(pool: PgPool) {
    let payload = serde_json::json!({});
    TaskRepo::enqueue(&pool, "upload", &payload, 3600.0).await.unwrap();
    assert!(TaskRepo::claim_next(&pool, "upload", 60.0).await.unwrap().is_none());
    assert_eq!(TaskRepo::count_open(&pool, "upload").await.unwrap(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_claim_respects_queue(pool: PgPool) {
    let payload = serde_json::json!({});
    TaskRepo::enqueue(&pool, "scan", &payload, 0.0).await.unwrap();
    assert!(TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap().is_none());
    assert!(TaskRepo::claim_next(&pool, "scan", 60.0).await.unwrap().is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_claim_counts_attempt_and_reschedule_keeps_it(pool: PgPool) {
    let payload = serde_json::json!({"k": 1});
    let task = TaskRepo::enqueue(&pool, "download", &payload, 0.0).await.unwrap();
    let claimed = TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);

    TaskRepo::reschedule(&pool, task.id, 0.0, "boom").await.unwrap();
    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.status_id, TaskStatus::Pending.id());
    assert_eq!(row.attempts, 1);
    assert_eq!(row.last_error.as_deref(), Some("boom"));
    assert!(row.locked_until.is_none());

    let reclaimed = TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.payload, payload);
    assert_eq!(reclaimed.attempts, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_expired_lease_is_reclaimable(pool: PgPool) {
    let payload = serde_json::json!({});
    let task = TaskRepo::enqueue(&pool, "download", &payload, 0.0).await.unwrap();
    sqlx::query(
        "UPDATE tasks SET status_id = $2, locked_until = NOW() - INTERVAL '1 minute' WHERE id = $1",
    )
    .bind(task.id)
    .bind(TaskStatus::Running.id())
    .execute(&pool)
    .await
    .unwrap();

    let reclaimed = TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.attempts, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_extended_lease_keeps_task_claimed(pool: PgPool) {
    let payload = serde_json::json!({});
    let task = TaskRepo::enqueue(&pool, "download", &payload, 0.0).await.unwrap();
    TaskRepo::claim_next(&pool, "download", 0.0).await.unwrap().unwrap();

    assert!(TaskRepo::extend_lease(&pool, task.id, 60.0).await.unwrap());
    assert!(TaskRepo::claim_next(&pool, "download", 60.0).await.unwrap().is_none());

    TaskRepo::complete(&pool, task.id).await.unwrap();
    assert!(!TaskRepo::extend_lease(&pool, task.id, 60.0).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_complete_and_purge(pool: PgPool) {
    let payload = serde_json::json!({});
    let task = TaskRepo::enqueue(&pool, "scan", &payload, 0.0).await.unwrap();
    TaskRepo::complete(&pool, task.id).await.unwrap();
    assert_eq!(TaskRepo::count_open(&pool, "scan").await.unwrap(), 0);

    let cutoff = chrono::Utc::now() + chrono::Duration::minutes(1);
    let deleted = TaskRepo::delete_completed_before(&pool, cutoff).await.unwrap();
    assert_eq!(deleted, 1);
}

// ---------------------------------------------------------------------------
// Scan cache
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_cache_put_merges_entries(pool: PgPool) {
    let key = "10.0.0.5:/a";
    ScanCacheRepo::put(&pool, key, &listing(&[("x", 1, 10), ("y", 2, 20)]), 60.0)
        .await
        .unwrap();
    ScanCacheRepo::put(&pool, key, &listing(&[("x", 5, 50)]), 60.0)
        .await
        .unwrap();

    let entry = ScanCacheRepo::get(&pool, key).await.unwrap().expect("entry");
    assert_eq!(entry.files.0.len(), 2);
    assert_eq!(entry.files.0["x"], FileMeta { size: 5, mtime: 50 });
    assert_eq!(entry.files.0["y"], FileMeta { size: 2, mtime: 20 });
}

#[sqlx::test(migrations = "./migrations")]
async fn test_cache_expired_entry_is_absent(pool: PgPool) {
    let key = "10.0.0.5:/a";
    ScanCacheRepo::put(&pool, key, &listing(&[("x", 1, 10)]), 60.0)
        .await
        .unwrap();
    sqlx::query("UPDATE scan_cache SET expires_at = NOW() - INTERVAL '1 second'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(ScanCacheRepo::get(&pool, key).await.unwrap().is_none());
    assert_eq!(ScanCacheRepo::delete_expired(&pool).await.unwrap(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_cache_forget_drops_only_named_files(pool: PgPool) {
    let key = "10.0.0.5:/a";
    ScanCacheRepo::put(&pool, key, &listing(&[("x", 1, 10), ("y", 2, 20)]), 60.0)
        .await
        .unwrap();

    ScanCacheRepo::forget(&pool, key, &["x".to_string()]).await.unwrap();

    let entry = ScanCacheRepo::get(&pool, key).await.unwrap().expect("entry");
    assert_eq!(entry.files.0.len(), 1);
    assert!(entry.files.0.contains_key("y"));
}
