//! The harvesting pipeline: scan remote directories, pull new or changed
//! files into local staging, push them to object storage.
//!
//! Work flows through three queues:
//!
//! - `scan`: [`ScanOrchestrator`] lists every active server and enqueues
//!   one download task per new or changed file.
//! - `download`: [`DownloadWorker`] waits for the file to settle, copies it
//!   into staging and enqueues an upload task.
//! - `upload`: [`UploadWorker`] pushes the staged file into its bucket.
//!
//! Every seam to the outside world (change cache, status store, server
//! source, task queue, remote sessions, object store) is a trait with a
//! PostgreSQL or network implementation and an in-memory one.

pub mod cache;
pub mod download;
pub mod error;
pub mod memory;
pub mod queue;
pub mod runner;
pub mod scan;
pub mod scheduler;
pub mod store;
pub mod upload;

pub use cache::{diff, ChangeCache, PgChangeCache, CACHE_TTL};
pub use download::{DownloadSettings, DownloadWorker};
pub use error::PipelineError;
pub use memory::{MemoryChangeCache, MemoryServerSource, MemoryStatusStore, MemoryTaskQueue};
pub use queue::{enqueue_task, ClaimedTask, PgTaskQueue, TaskQueue};
pub use runner::{QueueRunner, TaskHandler};
pub use scan::ScanOrchestrator;
pub use scheduler::ScanScheduler;
pub use store::{
    PgServerSource, PgStatusStore, ScanTarget, ServerSource, StatusDetail, StatusStore,
    StatusTracker,
};
pub use upload::UploadWorker;
