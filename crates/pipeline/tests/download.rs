//! Download worker against a fake remote and in-memory backends.

mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{payloads, target, FakeConnector, Harness, HOST, SETTLE};
use harvester_core::file_status::FileStatus;
use harvester_core::retry::RetryPolicy;
use harvester_core::task::{
    DownloadTask, FileKey, RemoteFile, TaskOutcome, UploadTask, QUEUE_DOWNLOAD, QUEUE_UPLOAD,
};
use harvester_db::models::status::TaskStatus;
use harvester_pipeline::download::today;
use harvester_pipeline::{
    enqueue_task, DownloadSettings, DownloadWorker, MemoryStatusStore, PipelineError,
    StatusDetail, StatusStore, StatusTracker, TaskQueue,
};

const FIFTY_MB: u64 = 50 * 1024 * 1024;

fn download_task(filename: &str, size: u64) -> DownloadTask {
    let identity = target(1, HOST, "/data/in").identity().unwrap();
    DownloadTask::new(
        &identity,
        "/data/in",
        RemoteFile {
            filename: filename.to_string(),
            size,
            mtime: 1_700_000_000,
        },
        1,
    )
}

fn key(filename: &str, size: u64) -> FileKey {
    FileKey {
        server_id: 1,
        filename: filename.to_string(),
        size,
    }
}

/// Status store whose first `failures` writes are lost.
struct FlakyStatusStore {
    inner: Arc<MemoryStatusStore>,
    failures: AtomicUsize,
}

#[async_trait]
impl StatusStore for FlakyStatusStore {
    async fn current(&self, key: &FileKey) -> Result<Option<FileStatus>, PipelineError> {
        self.inner.current(key).await
    }

    async fn record(
        &self,
        key: &FileKey,
        status: FileStatus,
        detail: &StatusDetail,
    ) -> Result<(), PipelineError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PipelineError::Staging(io::Error::new(
                io::ErrorKind::Other,
                "database unavailable",
            )));
        }
        self.inner.record(key, status, detail).await
    }
}

/// Drain the download queue, skipping retry delays, until it is empty.
async fn run_downloads_to_completion(h: &Harness) {
    for _ in 0..20 {
        if h.downloads.drain().await.unwrap() == 0 {
            return;
        }
        h.queue.make_due();
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stable_file_is_staged_and_handed_to_upload() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "big.bin", FIFTY_MB, 1_700_000_000);
    let task = download_task("big.bin", FIFTY_MB);

    let outcome = h.download_worker.process(&task, 0).await;

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(
        h.statuses.history_for(&key("big.bin", FIFTY_MB)),
        vec![
            FileStatus::New,
            FileStatus::Downloading,
            FileStatus::DownloadedToServer
        ]
    );

    let uploads: Vec<UploadTask> = payloads(&h.queue, QUEUE_UPLOAD);
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    let date = today().format("%Y-%m-%d").to_string();
    assert_eq!(upload.object_key, format!("/data/in/{date}/big.bin"));
    assert_eq!(upload.bucket_name, "server-10-0-0-5");
    assert_eq!(upload.size, FIFTY_MB);
    assert_eq!(upload.server_id, 1);

    let staged = h
        .staging
        .path()
        .join(HOST)
        .join("data/in")
        .join(&date)
        .join("big.bin");
    assert_eq!(upload.local_path, staged.to_string_lossy());
    assert_eq!(std::fs::metadata(&staged).unwrap().len(), FIFTY_MB);

    assert_eq!(h.remote.connects(), 1);
    assert_eq!(h.remote.disconnects(), 1);
}

#[tokio::test]
async fn rediscovered_stored_file_is_downloaded_again() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.statuses
        .record(&key("x", 10), FileStatus::DownloadedToMinio, &StatusDetail::default())
        .await
        .unwrap();

    let outcome = h.download_worker.process(&download_task("x", 10), 0).await;

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(h.remote.fetches(), 1);
}

#[tokio::test]
async fn lost_first_status_write_is_recovered_on_retry() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    let statuses = Arc::new(FlakyStatusStore {
        inner: h.statuses.clone(),
        failures: AtomicUsize::new(1),
    });
    let worker = DownloadWorker::new(
        Arc::new(FakeConnector {
            remote: h.remote.clone(),
        }),
        StatusTracker::new(statuses),
        h.queue.clone(),
        DownloadSettings {
            staging_root: h.staging.path().to_path_buf(),
            settle_delay: SETTLE,
            retry: RetryPolicy::default(),
        },
    );
    let task = download_task("x", 10);

    let first = worker.process(&task, 0).await;
    assert_matches!(first, TaskOutcome::Retry { .. });
    assert!(h.statuses.get(&key("x", 10)).is_none());

    let second = worker.process(&task, 1).await;
    assert_eq!(second, TaskOutcome::Completed);
    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(
        h.statuses.get(&key("x", 10)).unwrap().status,
        FileStatus::DownloadedToServer
    );
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reclaimed_task_restarts_download_left_by_dead_worker() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    enqueue_task(h.queue.as_ref(), QUEUE_DOWNLOAD, &download_task("x", 10))
        .await
        .unwrap();

    // First worker claims, marks the download started, then dies.
    let claimed = h.queue.claim(QUEUE_DOWNLOAD).await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 0);
    h.statuses
        .record(&key("x", 10), FileStatus::Downloading, &StatusDetail::default())
        .await
        .unwrap();
    h.queue.expire_leases();

    assert_eq!(h.downloads.drain().await.unwrap(), 1);

    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(
        h.statuses.get(&key("x", 10)).unwrap().status,
        FileStatus::DownloadedToServer
    );
    let task = &h.queue.tasks(QUEUE_DOWNLOAD)[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempts, 2);
    assert_eq!(h.queue.tasks(QUEUE_UPLOAD).len(), 1);
}

#[tokio::test]
async fn later_attempt_for_stored_file_is_skipped() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.statuses
        .record(&key("x", 10), FileStatus::DownloadedToMinio, &StatusDetail::default())
        .await
        .unwrap();

    let outcome = h.download_worker.process(&download_task("x", 10), 3).await;

    assert_matches!(outcome, TaskOutcome::Skipped { .. });
    assert_eq!(h.remote.connects(), 0);
    assert_eq!(h.remote.fetches(), 0);
}

// ---------------------------------------------------------------------------
// Duplicates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_task_for_file_in_flight_is_skipped() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.statuses
        .record(&key("x", 10), FileStatus::Downloading, &StatusDetail::default())
        .await
        .unwrap();

    let outcome = h.download_worker.process(&download_task("x", 10), 0).await;

    assert_matches!(outcome, TaskOutcome::Skipped { .. });
    assert_eq!(h.remote.connects(), 0);
    assert_eq!(h.remote.fetches(), 0);
    assert_eq!(
        h.statuses.get(&key("x", 10)).unwrap().status,
        FileStatus::Downloading
    );
}

#[tokio::test]
async fn duplicate_task_while_retrying_is_skipped() {
    let h = Harness::new(vec![]);
    h.statuses
        .record(&key("x", 10), FileStatus::Retry, &StatusDetail::default())
        .await
        .unwrap();

    let outcome = h.download_worker.process(&download_task("x", 10), 0).await;

    assert_matches!(outcome, TaskOutcome::Skipped { .. });
}

// ---------------------------------------------------------------------------
// Stability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unstable_file_is_rescheduled_not_fetched() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "growing.log", 10, 1);
    h.remote.make_growing("growing.log");

    let outcome = h.download_worker.process(&download_task("growing.log", 10), 0).await;

    assert_matches!(outcome, TaskOutcome::Retry { delay, .. } => {
        assert_eq!(delay, Duration::from_secs(30));
    });
    assert_eq!(h.remote.fetches(), 0);
    let record = h.statuses.get(&key("growing.log", 10)).unwrap();
    assert_eq!(record.status, FileStatus::Retry);
    assert_eq!(record.detail.error_message.as_deref(), Some("file is still changing"));
    assert_eq!(h.remote.disconnects(), 1);
    assert!(h.queue.tasks(QUEUE_UPLOAD).is_empty());
}

#[tokio::test]
async fn file_that_settles_is_fetched_on_a_later_attempt() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.remote.make_growing("x");
    let task = download_task("x", 10);
    enqueue_task(h.queue.as_ref(), QUEUE_DOWNLOAD, &task).await.unwrap();

    assert_eq!(h.downloads.drain().await.unwrap(), 1);
    h.remote.make_settled("x");
    h.queue.make_due();
    assert_eq!(h.downloads.drain().await.unwrap(), 1);

    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(h.queue.tasks(QUEUE_DOWNLOAD)[0].status, TaskStatus::Completed);
    assert_eq!(h.queue.tasks(QUEUE_UPLOAD).len(), 1);
}

#[tokio::test]
async fn instability_shares_the_retry_budget() {
    let policy = RetryPolicy {
        max_attempts: 3,
        ..Default::default()
    };
    let h = Harness::with_policy(vec![], policy);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.remote.make_growing("x");
    enqueue_task(h.queue.as_ref(), QUEUE_DOWNLOAD, &download_task("x", 10))
        .await
        .unwrap();

    run_downloads_to_completion(&h).await;

    assert_eq!(h.remote.fetches(), 0);
    assert_eq!(
        h.statuses.history_for(&key("x", 10)),
        vec![
            FileStatus::New,
            FileStatus::Retry,
            FileStatus::Retry,
            FileStatus::Error
        ]
    );
    assert_eq!(h.queue.tasks(QUEUE_DOWNLOAD)[0].status, TaskStatus::Failed);
}

// ---------------------------------------------------------------------------
// Failures and retry budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_failure_schedules_retry_after_a_minute() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.remote.fail_next_fetches(1);

    let outcome = h.download_worker.process(&download_task("x", 10), 0).await;

    assert_matches!(outcome, TaskOutcome::Retry { delay, .. } => {
        assert_eq!(delay, Duration::from_secs(60));
    });
    let record = h.statuses.get(&key("x", 10)).unwrap();
    assert_eq!(record.status, FileStatus::Retry);
    assert_eq!(record.detail.attempts, 1);
    assert!(record
        .detail
        .error_message
        .as_deref()
        .unwrap()
        .contains("connection reset"));
}

#[tokio::test]
async fn ten_consecutive_failures_end_in_error_without_an_eleventh_attempt() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.remote.fail_next_fetches(100);
    enqueue_task(h.queue.as_ref(), QUEUE_DOWNLOAD, &download_task("x", 10))
        .await
        .unwrap();

    run_downloads_to_completion(&h).await;

    assert_eq!(h.remote.fetches(), 10);
    let task = &h.queue.tasks(QUEUE_DOWNLOAD)[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 10);

    let record = h.statuses.get(&key("x", 10)).unwrap();
    assert_eq!(record.status, FileStatus::Error);
    assert_eq!(record.detail.attempts, 10);
    assert_eq!(
        h.statuses
            .history_for(&key("x", 10))
            .iter()
            .filter(|s| **s == FileStatus::Retry)
            .count(),
        9
    );
    assert!(h.queue.tasks(QUEUE_UPLOAD).is_empty());
}

#[tokio::test]
async fn recovery_after_transient_failures() {
    let h = Harness::new(vec![]);
    h.remote.put_file("/data/in", "x", 10, 1);
    h.remote.fail_next_fetches(2);
    enqueue_task(h.queue.as_ref(), QUEUE_DOWNLOAD, &download_task("x", 10))
        .await
        .unwrap();

    run_downloads_to_completion(&h).await;

    assert_eq!(h.remote.fetches(), 3);
    assert_eq!(
        h.statuses.history_for(&key("x", 10)),
        vec![
            FileStatus::New,
            FileStatus::Downloading,
            FileStatus::Retry,
            FileStatus::Downloading,
            FileStatus::Retry,
            FileStatus::Downloading,
            FileStatus::DownloadedToServer,
        ]
    );
    assert_eq!(h.queue.tasks(QUEUE_UPLOAD).len(), 1);
}

#[tokio::test]
async fn connect_failure_retries_and_disconnects() {
    let h = Harness::new(vec![]);
    h.remote.refuse_connections(true);

    let outcome = h.download_worker.process(&download_task("x", 10), 0).await;

    assert_matches!(outcome, TaskOutcome::Retry { .. });
    assert_eq!(h.remote.disconnects(), 1);
    assert_eq!(h.statuses.get(&key("x", 10)).unwrap().status, FileStatus::Retry);
}

#[tokio::test]
async fn vanished_file_is_a_retryable_failure() {
    let h = Harness::new(vec![]);

    let outcome = h.download_worker.process(&download_task("gone", 10), 0).await;

    assert_matches!(outcome, TaskOutcome::Retry { .. });
    assert_eq!(h.remote.fetches(), 0);
}
