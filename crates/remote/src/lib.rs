//! Remote file access for the harvester pipeline.
//!
//! [`RemoteFileService`] is one session to one remote host. The SFTP
//! implementation runs libssh2's blocking calls on Tokio's blocking pool.

pub mod error;
pub mod service;
pub mod sftp;
pub mod staging;

pub use error::RemoteError;
pub use service::{remote_file_path, RemoteConnector, RemoteFileService, DEFAULT_SETTLE_DELAY};
pub use sftp::{SftpConnector, SftpSession, DEFAULT_CONNECT_TIMEOUT};
pub use staging::{ensure_staging_dir, staging_dir};
