//! Session and connector traits.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::connection::ConnectionIdentity;
use harvester_core::task::{FileMeta, RemoteFile};

use crate::error::RemoteError;

/// Default wait between the two stats of a stability check.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// One session to one remote host.
///
/// Methods take `&self`; implementations keep the live connection behind
/// interior mutability so a session can be shared across awaits.
#[async_trait]
pub trait RemoteFileService: Send + Sync {
    /// Open the session. Authentication or network failure is
    /// [`RemoteError::Connection`].
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Close the session. Never fails; teardown problems are logged.
    async fn disconnect(&self);

    /// Regular files directly under `path`. Directories, symlinks and other
    /// entry types are skipped.
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    async fn stat_file(&self, path: &str, filename: &str) -> Result<FileMeta, RemoteError>;

    /// Stat, wait `settle_delay`, stat again. The file is stable only if
    /// size and mtime did not change.
    async fn is_stable(
        &self,
        path: &str,
        filename: &str,
        settle_delay: Duration,
    ) -> Result<bool, RemoteError> {
        let before = self.stat_file(path, filename).await?;
        tokio::time::sleep(settle_delay).await;
        let after = self.stat_file(path, filename).await?;
        Ok(before == after)
    }

    /// Copy `path/filename` to `destination` and return the bytes written.
    ///
    /// Fails with [`RemoteError::Transfer`] when the copy is interrupted or
    /// its length differs from the remote size at open time. A failed fetch
    /// may leave a partial file behind.
    async fn fetch(
        &self,
        path: &str,
        filename: &str,
        destination: &Path,
    ) -> Result<u64, RemoteError>;
}

/// Creates unconnected sessions.
pub trait RemoteConnector: Send + Sync {
    fn session(&self, identity: &ConnectionIdentity) -> Box<dyn RemoteFileService>;
}

/// Join a remote directory and a filename with exactly one `/`.
pub fn remote_file_path(path: &str, filename: &str) -> String {
    let dir = path.trim_end_matches('/');
    if dir.is_empty() && path.starts_with('/') {
        format!("/{filename}")
    } else if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{dir}/{filename}")
    }
}
