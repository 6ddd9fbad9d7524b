//! SFTP sessions over libssh2.
//!
//! libssh2 is blocking. Every call runs inside `spawn_blocking` against a
//! session held in `Arc<Mutex<Option<..>>>`, so one [`SftpSession`]
//! serializes its own operations.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::connection::ConnectionIdentity;
use harvester_core::task::{FileMeta, RemoteFile};
use ssh2::{FileStat, Session, Sftp};

use crate::error::RemoteError;
use crate::service::{remote_file_path, RemoteConnector, RemoteFileService};

/// Default TCP connect (and per-call libssh2) timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Copy buffer for [`SftpSession::fetch`].
const COPY_BUFFER_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens password-authenticated SFTP sessions.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    connect_timeout: Duration,
}

impl SftpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SftpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl RemoteConnector for SftpConnector {
    fn session(&self, identity: &ConnectionIdentity) -> Box<dyn RemoteFileService> {
        Box::new(SftpSession::new(identity.clone(), self.connect_timeout))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Connected {
    session: Session,
    sftp: Sftp,
}

/// One SFTP session to one host.
pub struct SftpSession {
    identity: ConnectionIdentity,
    connect_timeout: Duration,
    inner: Arc<Mutex<Option<Connected>>>,
}

impl SftpSession {
    pub fn new(identity: ConnectionIdentity, connect_timeout: Duration) -> Self {
        Self {
            identity,
            connect_timeout,
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against the live SFTP channel on the blocking pool.
    ///
    /// `on_abort` builds the error reported if the blocking task panics.
    async fn with_sftp<T, F, E>(&self, op: F, on_abort: E) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, RemoteError> + Send + 'static,
        E: FnOnce(String) -> RemoteError + Send,
    {
        let inner = Arc::clone(&self.inner);
        let address = self.identity.address();
        tokio::task::spawn_blocking(move || {
            let guard = inner
                .lock()
                .map_err(|_| RemoteError::NotConnected(address.clone()))?;
            let connected = guard
                .as_ref()
                .ok_or_else(|| RemoteError::NotConnected(address.clone()))?;
            op(&connected.sftp)
        })
        .await
        .map_err(|e| on_abort(e.to_string()))?
    }
}

#[async_trait]
impl RemoteFileService for SftpSession {
    async fn connect(&self) -> Result<(), RemoteError> {
        let identity = self.identity.clone();
        let timeout = self.connect_timeout;
        let address = identity.address();

        let connected = tokio::task::spawn_blocking(move || open_session(&identity, timeout))
            .await
            .map_err(|e| RemoteError::connection(address.clone(), e))??;

        let mut guard = self
            .inner
            .lock()
            .map_err(|_| RemoteError::connection(address.clone(), "session lock poisoned"))?;
        *guard = Some(connected);
        tracing::debug!(address = %address, "SFTP session opened");
        Ok(())
    }

    async fn disconnect(&self) {
        let address = self.identity.address();
        let taken = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                tracing::warn!(address = %address, "SFTP session lock poisoned on disconnect");
                return;
            }
        };
        let Some(connected) = taken else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || {
            let Connected { session, sftp } = connected;
            drop(sftp);
            session.disconnect(None, "closing", None)
        })
        .await;

        match result {
            Ok(Ok(())) => tracing::debug!(address = %address, "SFTP session closed"),
            Ok(Err(e)) => {
                tracing::warn!(address = %address, error = %e, "SFTP disconnect failed");
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "SFTP disconnect task aborted");
            }
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let dir = path.to_string();
        let abort_path = dir.clone();
        self.with_sftp(
            move |sftp| {
                let entries = sftp
                    .readdir(Path::new(&dir))
                    .map_err(|e| RemoteError::listing(dir.as_str(), e))?;
                Ok(regular_files(entries))
            },
            move |msg| RemoteError::listing(abort_path, msg),
        )
        .await
    }

    async fn stat_file(&self, path: &str, filename: &str) -> Result<FileMeta, RemoteError> {
        let full = remote_file_path(path, filename);
        let abort_path = full.clone();
        self.with_sftp(
            move |sftp| {
                let stat = sftp
                    .stat(Path::new(&full))
                    .map_err(|e| RemoteError::stat(full.as_str(), e))?;
                Ok(file_meta(&stat))
            },
            move |msg| RemoteError::stat(abort_path, msg),
        )
        .await
    }

    async fn fetch(
        &self,
        path: &str,
        filename: &str,
        destination: &Path,
    ) -> Result<u64, RemoteError> {
        let full = remote_file_path(path, filename);
        let abort_path = full.clone();
        let destination = destination.to_path_buf();
        self.with_sftp(
            move |sftp| copy_to_local(sftp, &full, &destination),
            move |msg| RemoteError::transfer(abort_path, msg),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Blocking helpers
// ---------------------------------------------------------------------------

fn open_session(identity: &ConnectionIdentity, timeout: Duration) -> Result<Connected, RemoteError> {
    let address = identity.address();
    let conn_err = |message: String| RemoteError::connection(address.clone(), message);

    let socket_addr = address
        .to_socket_addrs()
        .map_err(|e| conn_err(format!("cannot resolve: {e}")))?
        .next()
        .ok_or_else(|| conn_err("no address resolved".to_string()))?;
    let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|e| conn_err(format!("tcp connect: {e}")))?;

    let mut session = Session::new().map_err(|e| conn_err(format!("create session: {e}")))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| conn_err(format!("handshake: {e}")))?;
    session
        .userauth_password(&identity.username, &identity.password)
        .map_err(|e| conn_err(format!("authentication: {e}")))?;
    if !session.authenticated() {
        return Err(conn_err("authentication rejected".to_string()));
    }
    let sftp = session
        .sftp()
        .map_err(|e| conn_err(format!("sftp subsystem: {e}")))?;

    Ok(Connected { session, sftp })
}

fn regular_files(entries: Vec<(PathBuf, FileStat)>) -> Vec<RemoteFile> {
    entries
        .into_iter()
        .filter(|(_, stat)| stat.is_file())
        .filter_map(|(path, stat)| {
            let filename = path.file_name()?.to_string_lossy().into_owned();
            let meta = file_meta(&stat);
            Some(RemoteFile {
                filename,
                size: meta.size,
                mtime: meta.mtime,
            })
        })
        .collect()
}

fn file_meta(stat: &FileStat) -> FileMeta {
    FileMeta {
        size: stat.size.unwrap_or(0),
        mtime: stat
            .mtime
            .and_then(|t| i64::try_from(t).ok())
            .unwrap_or(0),
    }
}

fn copy_to_local(sftp: &Sftp, remote: &str, destination: &Path) -> Result<u64, RemoteError> {
    let err = |message: String| RemoteError::transfer(remote, message);

    let mut source = sftp
        .open(Path::new(remote))
        .map_err(|e| err(format!("open: {e}")))?;
    let expected = source
        .stat()
        .map_err(|e| err(format!("stat: {e}")))?
        .size
        .unwrap_or(0);
    let mut target = std::fs::File::create(destination)
        .map_err(|e| err(format!("create {}: {e}", destination.display())))?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = source
            .read(&mut buf)
            .map_err(|e| err(format!("read: {e}")))?;
        if n == 0 {
            break;
        }
        target
            .write_all(&buf[..n])
            .map_err(|e| err(format!("write: {e}")))?;
        written += n as u64;
    }
    target
        .sync_all()
        .map_err(|e| err(format!("sync: {e}")))?;

    if written != expected {
        return Err(err(format!(
            "copied {written} bytes, remote reported {expected}"
        )));
    }
    Ok(written)
}
