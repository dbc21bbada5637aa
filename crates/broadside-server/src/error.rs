//! Server error types.

use std::net::SocketAddr;

use broadside_ws::WsError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced to callers of the [`Server`](crate::Server).
///
/// Failures of individual connections never appear here; they are contained
/// at the connection and only show up in broadcast statistics and logs.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configured host does not form a valid listen address.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// The operation needs a started server.
    #[error("server is not running")]
    NotRunning,

    /// `start` was called on a server that is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// A direct send to one connection failed, or the message kind cannot be
    /// sent to clients.
    #[error(transparent)]
    Connection(#[from] WsError),

    /// An internal task failed.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns `true` for [`ServerError::NotRunning`].
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let message = err.to_string();
        assert!(message.contains("127.0.0.1:8080"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_running() {
        assert!(ServerError::NotRunning.is_not_running());
        assert!(!ServerError::AlreadyRunning.is_not_running());
        assert_eq!(ServerError::NotRunning.to_string(), "server is not running");
    }
}
