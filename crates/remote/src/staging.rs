//! Local staging area for downloaded files.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use harvester_core::naming;

/// `{root}/{host}/{remote_path}/{YYYY-MM-DD}`.
pub fn staging_dir(root: &Path, host: &str, remote_path: &str, date: NaiveDate) -> PathBuf {
    root.join(naming::staging_relative(host, remote_path, date))
}

/// Create `dir` and its parents if missing.
pub async fn ensure_staging_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}
