/// Failures of a remote session.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Network, handshake or authentication failure.
    #[error("Connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    #[error("Listing {path} failed: {message}")]
    Listing { path: String, message: String },

    #[error("Stat of {path} failed: {message}")]
    Stat { path: String, message: String },

    /// I/O fault while copying, or a short copy.
    #[error("Transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("Session to {0} is not connected")]
    NotConnected(String),
}

impl RemoteError {
    pub fn connection(address: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            address: address.into(),
            message: message.to_string(),
        }
    }

    pub fn listing(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Listing {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn stat(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Stat {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn transfer(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Transfer {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
