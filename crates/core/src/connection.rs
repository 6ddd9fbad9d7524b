//! Connection identity of a remote server.
//!
//! Several configured scan paths may point at the same server with the same
//! credentials. They share one [`ConnectionIdentity`] and are scanned over a
//! single session.

use std::fmt;

use crate::error::CoreError;

/// Everything needed to open a session: host, port and credentials.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionIdentity {
    /// Build an identity from raw configuration values.
    ///
    /// The port is stored as INTEGER in the database, so it is range-checked
    /// here. Host and username must be non-blank.
    pub fn from_parts(
        host: &str,
        port: i32,
        username: &str,
        password: &str,
    ) -> Result<Self, CoreError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(CoreError::Validation("Server host must not be empty".into()));
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                CoreError::Validation(format!("Server port {port} is outside 1..=65535"))
            })?;
        if username.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Server {host}:{port} has an empty username"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// `host:port`, suitable for `TcpStream::connect` and log fields.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
