//! Process-local implementations of the pipeline seams.
//!
//! Used by the test suites and for single-node development runs without a
//! database. Nothing here survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use harvester_core::file_status::FileStatus;
use harvester_core::naming;
use harvester_core::task::{FileKey, RemoteFile};
use harvester_core::types::DbId;
use harvester_db::models::scan_cache::CachedListing;
use harvester_db::models::status::TaskStatus;

use crate::cache::{to_cached, ChangeCache, CACHE_TTL};
use crate::error::PipelineError;
use crate::queue::{ClaimedTask, TaskQueue, DEFAULT_LEASE};
use crate::store::{ScanTarget, ServerSource, StatusDetail, StatusStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Change cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    files: CachedListing,
    expires_at: Instant,
}

/// [`ChangeCache`] in a map keyed by `"{host}:{path}"`.
pub struct MemoryChangeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for MemoryChangeCache {
    fn default() -> Self {
        Self::with_ttl(CACHE_TTL)
    }
}

impl MemoryChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Live entry for `host:path`; `None` on miss or expiry.
    pub fn entry(&self, host: &str, path: &str) -> Option<CachedListing> {
        let entries = lock(&self.entries);
        entries
            .get(&naming::cache_key(host, path))
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.files.clone())
    }

    /// Remaining lifetime of the entry for `host:path`.
    pub fn time_to_live(&self, host: &str, path: &str) -> Option<Duration> {
        let entries = lock(&self.entries);
        entries
            .get(&naming::cache_key(host, path))
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl ChangeCache for MemoryChangeCache {
    async fn get(&self, host: &str, path: &str) -> Result<CachedListing, PipelineError> {
        Ok(self.entry(host, path).unwrap_or_default())
    }

    async fn put(
        &self,
        host: &str,
        path: &str,
        listing: &[RemoteFile],
    ) -> Result<(), PipelineError> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let entry = entries
            .entry(naming::cache_key(host, path))
            .or_insert_with(|| CacheEntry {
                files: CachedListing::new(),
                expires_at: now,
            });
        if entry.expires_at <= now {
            entry.files.clear();
        }
        entry.files.extend(to_cached(listing));
        entry.expires_at = now + self.ttl;
        Ok(())
    }

    async fn forget(
        &self,
        host: &str,
        path: &str,
        filenames: &[String],
    ) -> Result<(), PipelineError> {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&naming::cache_key(host, path)) {
            for name in filenames {
                entry.files.remove(name);
            }
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, PipelineError> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Status store
// ---------------------------------------------------------------------------

/// A stored status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStatus {
    pub status: FileStatus,
    pub detail: StatusDetail,
}

/// [`StatusStore`] that also keeps every write in order.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<FileKey, StoredStatus>>,
    history: Mutex<Vec<(FileKey, FileStatus)>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &FileKey) -> Option<StoredStatus> {
        lock(&self.records).get(key).cloned()
    }

    /// Every status written for `key`, oldest first.
    pub fn history_for(&self, key: &FileKey) -> Vec<FileStatus> {
        lock(&self.history)
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn current(&self, key: &FileKey) -> Result<Option<FileStatus>, PipelineError> {
        Ok(lock(&self.records).get(key).map(|r| r.status))
    }

    async fn record(
        &self,
        key: &FileKey,
        status: FileStatus,
        detail: &StatusDetail,
    ) -> Result<(), PipelineError> {
        lock(&self.records).insert(
            key.clone(),
            StoredStatus {
                status,
                detail: detail.clone(),
            },
        );
        lock(&self.history).push((key.clone(), status));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryServerSource {
    targets: Mutex<Vec<ScanTarget>>,
}

impl MemoryServerSource {
    pub fn new(targets: Vec<ScanTarget>) -> Self {
        Self {
            targets: Mutex::new(targets),
        }
    }
}

#[async_trait]
impl ServerSource for MemoryServerSource {
    async fn active_servers(&self) -> Result<Vec<ScanTarget>, PipelineError> {
        Ok(lock(&self.targets).clone())
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

/// Snapshot of one task held by [`MemoryTaskQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTask {
    pub id: DbId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Claims so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Delay requested by the last enqueue or retry.
    pub delay: Duration,
    run_at: Instant,
    locked_until: Option<Instant>,
    updated_at: Instant,
}

impl MemoryTask {
    fn is_due(&self, now: Instant) -> bool {
        match self.status {
            TaskStatus::Pending => self.run_at <= now,
            TaskStatus::Running => self.locked_until.is_some_and(|until| until <= now),
            _ => false,
        }
    }
}

#[derive(Default)]
struct QueueState {
    next_id: DbId,
    tasks: BTreeMap<DbId, MemoryTask>,
}

/// [`TaskQueue`] in memory. Claims are exclusive until their lease runs out.
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
    lease: Duration,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease,
        }
    }

    /// Let every running task's lease run out, as if its worker died.
    pub fn expire_leases(&self) {
        let now = Instant::now();
        for task in lock(&self.state).tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.locked_until = Some(now);
            }
        }
    }

    /// Every task ever enqueued on `queue`, in id order.
    pub fn tasks(&self, queue: &str) -> Vec<MemoryTask> {
        lock(&self.state)
            .tasks
            .values()
            .filter(|t| t.queue == queue)
            .cloned()
            .collect()
    }

    /// Make every pending task due now, skipping its retry delay.
    pub fn make_due(&self) {
        let now = Instant::now();
        for task in lock(&self.state).tasks.values_mut() {
            if task.status == TaskStatus::Pending {
                task.run_at = now;
            }
        }
    }

    fn update<F>(&self, id: DbId, apply: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut MemoryTask),
    {
        let mut state = lock(&self.state);
        if let Some(task) = state.tasks.get_mut(&id) {
            apply(task);
            task.updated_at = Instant::now();
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<DbId, PipelineError> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(
            id,
            MemoryTask {
                id,
                queue: queue.to_string(),
                payload,
                status: TaskStatus::Pending,
                attempts: 0,
                last_error: None,
                delay,
                run_at: now + delay,
                locked_until: None,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedTask>, PipelineError> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let next = state
            .tasks
            .values_mut()
            .filter(|t| t.queue == queue && t.is_due(now))
            .min_by_key(|t| (t.run_at, t.id));
        Ok(next.map(|task| {
            let attempt = task.attempts;
            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.locked_until = Some(now + self.lease);
            task.updated_at = now;
            ClaimedTask {
                id: task.id,
                queue: task.queue.clone(),
                payload: task.payload.clone(),
                attempts: attempt,
            }
        }))
    }

    async fn renew(&self, id: DbId) -> Result<(), PipelineError> {
        let lease = self.lease;
        self.update(id, |task| {
            if task.status == TaskStatus::Running {
                task.locked_until = Some(Instant::now() + lease);
            }
        })
    }

    async fn complete(&self, id: DbId) -> Result<(), PipelineError> {
        self.update(id, |task| {
            task.status = TaskStatus::Completed;
            task.locked_until = None;
        })
    }

    async fn retry(&self, id: DbId, delay: Duration, reason: &str) -> Result<(), PipelineError> {
        self.update(id, |task| {
            task.status = TaskStatus::Pending;
            task.last_error = Some(reason.to_string());
            task.delay = delay;
            task.run_at = Instant::now() + delay;
            task.locked_until = None;
        })
    }

    async fn fail(&self, id: DbId, reason: &str) -> Result<(), PipelineError> {
        self.update(id, |task| {
            task.status = TaskStatus::Failed;
            task.last_error = Some(reason.to_string());
            task.locked_until = None;
        })
    }

    async fn pending_count(&self, queue: &str) -> Result<u64, PipelineError> {
        let state = lock(&self.state);
        let count = state
            .tasks
            .values()
            .filter(|t| {
                t.queue == queue
                    && matches!(t.status, TaskStatus::Pending | TaskStatus::Running)
            })
            .count();
        Ok(count as u64)
    }

    async fn purge_completed(&self, age: Duration) -> Result<u64, PipelineError> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let before = state.tasks.len();
        state.tasks.retain(|_, t| {
            !(t.status == TaskStatus::Completed
                && now.saturating_duration_since(t.updated_at) >= age)
        });
        Ok((before - state.tasks.len()) as u64)
    }
}
