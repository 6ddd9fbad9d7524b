//! Configuration and logging for the `harvester-worker` binary.

pub mod config;
pub mod logging;
