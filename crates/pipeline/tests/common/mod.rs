#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::connection::ConnectionIdentity;
use harvester_core::retry::RetryPolicy;
use harvester_core::task::{FileMeta, RemoteFile};
use harvester_core::types::DbId;
use harvester_pipeline::{
    DownloadSettings, DownloadWorker, MemoryChangeCache, MemoryServerSource, MemoryStatusStore,
    MemoryTaskQueue, QueueRunner, ScanOrchestrator, ScanTarget, StatusTracker, UploadWorker,
};
use harvester_remote::{RemoteConnector, RemoteError, RemoteFileService};
use harvester_storage::MemoryObjectStore;
use tempfile::TempDir;

pub const HOST: &str = "10.0.0.5";

/// Settle delay used by every test worker.
pub const SETTLE: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Fake remote server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeFile {
    size: u64,
    mtime: i64,
}

/// Scripted remote host shared by every session a [`FakeConnector`] opens.
#[derive(Default)]
pub struct FakeRemote {
    dirs: Mutex<HashMap<String, Vec<(String, FakeFile)>>>,
    /// Files whose mtime moves on every stat.
    growing: Mutex<HashSet<String>>,
    broken_listings: Mutex<HashSet<String>>,
    refuse_connections: AtomicBool,
    failing_fetches: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fetches: AtomicUsize,
    pub opened: Mutex<Vec<ConnectionIdentity>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add or replace a regular file.
    pub fn put_file(&self, dir: &str, name: &str, size: u64, mtime: i64) {
        let mut dirs = self.dirs.lock().unwrap();
        let files = dirs.entry(dir.to_string()).or_default();
        files.retain(|(n, _)| n != name);
        files.push((name.to_string(), FakeFile { size, mtime }));
    }

    pub fn make_growing(&self, name: &str) {
        self.growing.lock().unwrap().insert(name.to_string());
    }

    pub fn make_settled(&self, name: &str) {
        self.growing.lock().unwrap().remove(name);
    }

    pub fn break_listing(&self, dir: &str) {
        self.broken_listings.lock().unwrap().insert(dir.to_string());
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, dir: &str, name: &str) -> Option<FakeFile> {
        let dirs = self.dirs.lock().unwrap();
        dirs.get(dir)?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f.clone())
    }
}

pub struct FakeConnector {
    pub remote: Arc<FakeRemote>,
}

impl RemoteConnector for FakeConnector {
    fn session(&self, identity: &ConnectionIdentity) -> Box<dyn RemoteFileService> {
        Box::new(FakeSession {
            remote: Arc::clone(&self.remote),
            identity: identity.clone(),
            connected: AtomicBool::new(false),
        })
    }
}

struct FakeSession {
    remote: Arc<FakeRemote>,
    identity: ConnectionIdentity,
    connected: AtomicBool,
}

impl FakeSession {
    fn ensure_connected(&self) -> Result<(), RemoteError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NotConnected(self.identity.address()))
        }
    }
}

#[async_trait]
impl RemoteFileService for FakeSession {
    async fn connect(&self) -> Result<(), RemoteError> {
        if self.remote.refuse_connections.load(Ordering::SeqCst) {
            return Err(RemoteError::connection(self.identity.address(), "connection refused"));
        }
        self.remote.connects.fetch_add(1, Ordering::SeqCst);
        self.remote.opened.lock().unwrap().push(self.identity.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.remote.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        self.ensure_connected()?;
        if self.remote.broken_listings.lock().unwrap().contains(path) {
            return Err(RemoteError::listing(path, "permission denied"));
        }
        let dirs = self.remote.dirs.lock().unwrap();
        Ok(dirs
            .get(path)
            .map(|files| {
                files
                    .iter()
                    .map(|(name, f)| RemoteFile {
                        filename: name.clone(),
                        size: f.size,
                        mtime: f.mtime,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stat_file(&self, path: &str, filename: &str) -> Result<FileMeta, RemoteError> {
        self.ensure_connected()?;
        let file = self
            .remote
            .lookup(path, filename)
            .ok_or_else(|| RemoteError::stat(format!("{path}/{filename}"), "no such file"))?;
        if self.remote.growing.lock().unwrap().contains(filename) {
            // Every stat observes a newer write.
            self.remote.put_file(path, filename, file.size + 1, file.mtime + 1);
        }
        Ok(FileMeta {
            size: file.size,
            mtime: file.mtime,
        })
    }

    async fn fetch(
        &self,
        path: &str,
        filename: &str,
        destination: &Path,
    ) -> Result<u64, RemoteError> {
        self.ensure_connected()?;
        self.remote.fetches.fetch_add(1, Ordering::SeqCst);
        let full = format!("{path}/{filename}");
        let failing = self
            .remote
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::transfer(full, "connection reset"));
        }
        let file = self
            .remote
            .lookup(path, filename)
            .ok_or_else(|| RemoteError::transfer(full.clone(), "no such file"))?;
        let contents = vec![0xA5u8; file.size as usize];
        tokio::fs::write(destination, &contents)
            .await
            .map_err(|e| RemoteError::transfer(full, e))?;
        Ok(file.size)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn target(server_id: DbId, host: &str, path: &str) -> ScanTarget {
    ScanTarget {
        server_id,
        host: host.to_string(),
        port: 22,
        path: path.to_string(),
        username: "ingest".to_string(),
        password: "secret".to_string(),
    }
}

/// Every component wired over in-memory backends and one fake remote.
pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub servers: Arc<MemoryServerSource>,
    pub cache: Arc<MemoryChangeCache>,
    pub statuses: Arc<MemoryStatusStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub objects: Arc<MemoryObjectStore>,
    pub staging: TempDir,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub download_worker: Arc<DownloadWorker>,
    pub upload_worker: Arc<UploadWorker>,
    pub scanner: QueueRunner<ScanOrchestrator>,
    pub downloads: QueueRunner<DownloadWorker>,
    pub uploads: QueueRunner<UploadWorker>,
}

impl Harness {
    pub fn new(targets: Vec<ScanTarget>) -> Self {
        Self::with_policy(targets, RetryPolicy::default())
    }

    pub fn with_policy(targets: Vec<ScanTarget>, policy: RetryPolicy) -> Self {
        let remote = FakeRemote::new();
        let servers = Arc::new(MemoryServerSource::new(targets));
        let cache = Arc::new(MemoryChangeCache::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let staging = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector {
            remote: Arc::clone(&remote),
        });
        let tracker = StatusTracker::new(statuses.clone());

        let orchestrator = Arc::new(ScanOrchestrator::new(
            servers.clone(),
            cache.clone(),
            connector.clone(),
            queue.clone(),
        ));
        let settings = DownloadSettings {
            staging_root: staging.path().to_path_buf(),
            settle_delay: SETTLE,
            retry: policy.clone(),
        };
        let download_worker = Arc::new(DownloadWorker::new(
            connector,
            tracker.clone(),
            queue.clone(),
            settings,
        ));
        let upload_worker = Arc::new(UploadWorker::new(objects.clone(), tracker, policy));

        Self {
            scanner: QueueRunner::new(queue.clone(), orchestrator.clone(), 1),
            downloads: QueueRunner::new(queue.clone(), download_worker.clone(), 1),
            uploads: QueueRunner::new(queue.clone(), upload_worker.clone(), 1),
            orchestrator,
            download_worker,
            upload_worker,
            remote,
            servers,
            cache,
            statuses,
            queue,
            objects,
            staging,
        }
    }
}

/// Decode every task payload on `queue`.
pub fn payloads<T: serde::de::DeserializeOwned>(queue: &MemoryTaskQueue, name: &str) -> Vec<T> {
    queue
        .tasks(name)
        .into_iter()
        .map(|t| serde_json::from_value(t.payload).unwrap())
        .collect()
}
