//! Pure domain logic for the harvester pipeline.
//!
//! Nothing in this crate performs I/O. It holds the file status state
//! machine, the task messages exchanged over the work queues, the naming
//! rules for cache keys, staging paths and object keys, and the retry
//! policy shared by the download and upload workers.

pub mod connection;
pub mod error;
pub mod file_status;
pub mod naming;
pub mod retry;
pub mod scan;
pub mod task;
pub mod types;
