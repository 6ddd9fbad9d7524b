//! Scan orchestrator.
//!
//! One scan lists every active scan path, diffs each listing against the
//! change cache and enqueues a download task per new or changed file.
//! Paths sharing a connection identity are scanned over one session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use harvester_core::connection::ConnectionIdentity;
use harvester_core::scan::ScanSummary;
use harvester_core::task::{DownloadTask, ScanTask, TaskOutcome, QUEUE_DOWNLOAD, QUEUE_SCAN};
use harvester_core::types::DbId;
use harvester_remote::{RemoteConnector, RemoteFileService};

use crate::cache::{diff, ChangeCache};
use crate::queue::{enqueue_task, TaskQueue};
use crate::runner::TaskHandler;
use crate::store::{ScanTarget, ServerSource};

/// Scan paths reachable over one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionGroup {
    pub identity: ConnectionIdentity,
    /// `(path, server_id)` in first-seen order. A path appears once.
    pub paths: Vec<(String, DbId)>,
}

/// Group targets by connection identity, keeping first-seen order.
///
/// Targets with an unusable identity are logged and counted in
/// `summary.errors`.
pub fn group_targets(targets: &[ScanTarget], summary: &mut ScanSummary) -> Vec<ConnectionGroup> {
    let mut groups: Vec<ConnectionGroup> = Vec::new();
    let mut index: HashMap<ConnectionIdentity, usize> = HashMap::new();

    for target in targets {
        let identity = match target.identity() {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(
                    server_id = target.server_id,
                    host = %target.host,
                    error = %e,
                    "Skipping misconfigured server",
                );
                summary.errors += 1;
                continue;
            }
        };

        let slot = *index.entry(identity.clone()).or_insert_with(|| {
            groups.push(ConnectionGroup {
                identity,
                paths: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        if !group.paths.iter().any(|(path, _)| *path == target.path) {
            group.paths.push((target.path.clone(), target.server_id));
        }
    }

    groups
}

/// Handler for the `scan` queue.
pub struct ScanOrchestrator {
    servers: Arc<dyn ServerSource>,
    cache: Arc<dyn ChangeCache>,
    connector: Arc<dyn RemoteConnector>,
    queue: Arc<dyn TaskQueue>,
}

impl ScanOrchestrator {
    pub fn new(
        servers: Arc<dyn ServerSource>,
        cache: Arc<dyn ChangeCache>,
        connector: Arc<dyn RemoteConnector>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            servers,
            cache,
            connector,
            queue,
        }
    }

    /// Run one full scan. Never fails; problems are counted in the summary.
    pub async fn run(&self) -> ScanSummary {
        let mut summary = ScanSummary::default();

        let targets = match self.servers.active_servers().await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load servers");
                summary.errors += 1;
                return summary;
            }
        };
        summary.servers_total = targets.len();
        if targets.is_empty() {
            tracing::info!("No servers to scan");
            return summary;
        }

        let groups = group_targets(&targets, &mut summary);
        summary.groups_total = groups.len();

        for group in &groups {
            self.scan_group(group, &mut summary).await;
        }

        tracing::info!(
            servers = summary.servers_total,
            groups = summary.groups_total,
            groups_processed = summary.groups_processed,
            paths = summary.paths_scanned,
            enqueued = summary.files_enqueued,
            errors = summary.errors,
            "Scan finished",
        );
        summary
    }

    async fn scan_group(&self, group: &ConnectionGroup, summary: &mut ScanSummary) {
        let host = group.identity.host.as_str();
        let session = self.connector.session(&group.identity);

        if let Err(e) = session.connect().await {
            tracing::error!(host, port = group.identity.port, error = %e, "Connect failed");
            summary.errors += 1;
            session.disconnect().await;
            return;
        }
        summary.groups_processed += 1;

        for (path, server_id) in &group.paths {
            self.scan_path(session.as_ref(), &group.identity, path, *server_id, summary)
                .await;
        }

        session.disconnect().await;
    }

    async fn scan_path(
        &self,
        session: &dyn RemoteFileService,
        identity: &ConnectionIdentity,
        path: &str,
        server_id: DbId,
        summary: &mut ScanSummary,
    ) {
        let host = identity.host.as_str();

        let listing = match session.list_directory(path).await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::error!(host, path, error = %e, "Listing failed");
                summary.errors += 1;
                return;
            }
        };
        summary.paths_scanned += 1;

        let cached = match self.cache.get(host, path).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::error!(host, path, error = %e, "Change cache read failed");
                summary.errors += 1;
                return;
            }
        };
        let changed = diff(&listing, &cached);

        // A failed refresh leaves the old entry, so the next scan finds the
        // same files again.
        if let Err(e) = self.cache.put(host, path, &listing).await {
            tracing::error!(host, path, error = %e, "Change cache write failed");
            summary.errors += 1;
            return;
        }

        tracing::debug!(
            host,
            path,
            listed = listing.len(),
            changed = changed.len(),
            "Path scanned",
        );

        let mut unsent = Vec::new();
        for file in changed {
            let filename = file.filename.clone();
            let task = DownloadTask::new(identity, path, file, server_id);
            match enqueue_task(self.queue.as_ref(), QUEUE_DOWNLOAD, &task).await {
                Ok(task_id) => {
                    tracing::info!(
                        host,
                        path,
                        filename = %filename,
                        server_id,
                        task_id,
                        "Download enqueued",
                    );
                    summary.files_enqueued += 1;
                }
                Err(e) => {
                    tracing::error!(
                        host,
                        path,
                        filename = %filename,
                        error = %e,
                        "Enqueue failed",
                    );
                    summary.errors += 1;
                    unsent.push(filename);
                }
            }
        }

        // The cache already holds the new tuples; drop the files that never
        // reached the queue so the next scan picks them up again.
        if !unsent.is_empty() {
            if let Err(e) = self.cache.forget(host, path, &unsent).await {
                tracing::error!(
                    host,
                    path,
                    files = unsent.len(),
                    error = %e,
                    "Failed to roll back change cache",
                );
                summary.errors += 1;
            }
        }
    }
}

#[async_trait]
impl TaskHandler for ScanOrchestrator {
    type Task = ScanTask;

    fn queue(&self) -> &'static str {
        QUEUE_SCAN
    }

    async fn handle(&self, _task: ScanTask, _attempt: u32) -> TaskOutcome {
        self.run().await;
        TaskOutcome::Completed
    }
}
