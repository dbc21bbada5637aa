//! Error types for connection handling and broadcasting.
//!
//! Connection-level errors are contained at the connection boundary: they
//! describe why a single connection failed or was evicted and are never
//! surfaced to a broadcast caller as a failure of the whole call. The one
//! error a broadcast returns is [`WsError::InvalidMessage`], for a payload
//! no connection could be sent.

use std::fmt;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Result type for connection operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur while upgrading, running or feeding a connection.
#[derive(Debug, Error)]
pub enum WsError {
    /// The WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// The client did not complete the handshake in time.
    #[error("WebSocket handshake timed out after {timeout_ms} ms")]
    HandshakeTimeout {
        /// The handshake timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The outbound queue of a connection is full.
    #[error("outbound queue full for connection {connection_id} (capacity {capacity})")]
    QueueOverflow {
        /// The connection whose queue overflowed.
        connection_id: ConnectionId,
        /// The configured queue capacity.
        capacity: usize,
    },

    /// The connection is closing or closed and accepts no more messages.
    #[error("connection {connection_id} is closed")]
    ConnectionClosed {
        /// The closed connection.
        connection_id: ConnectionId,
    },

    /// Only text and binary messages can be queued for delivery.
    #[error("cannot send a {kind} message; only text and binary are accepted")]
    InvalidMessage {
        /// Kind of the refused message.
        kind: &'static str,
    },

    /// Writing a frame to the transport failed.
    #[error("failed to send message: {0}")]
    SendFailed(#[source] tungstenite::Error),

    /// Reading a frame from the transport failed.
    #[error("failed to receive message: {0}")]
    ReceiveFailed(#[source] tungstenite::Error),

    /// A connection with this ID is already registered.
    #[error("connection {connection_id} is already registered")]
    DuplicateConnection {
        /// The duplicated connection ID.
        connection_id: ConnectionId,
    },

    /// The registry has been sealed for shutdown.
    #[error("connection registry is closed")]
    RegistryClosed,

    /// The message payload could not be decoded.
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),

    /// The message payload could not be encoded.
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),
}

impl WsError {
    /// Create a new handshake failed error.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed(reason.into())
    }

    /// Create a new connection closed error.
    pub fn connection_closed(connection_id: ConnectionId) -> Self {
        Self::ConnectionClosed { connection_id }
    }

    /// Create a new queue overflow error.
    pub fn queue_overflow(connection_id: ConnectionId, capacity: usize) -> Self {
        Self::QueueOverflow {
            connection_id,
            capacity,
        }
    }
}

/// Close code for WebSocket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001), used on server shutdown.
    GoingAway = 1001,
    /// Policy violation (1008), used on eviction.
    PolicyViolation = 1008,
    /// Internal error (1011), used when the transport failed.
    InternalError = 1011,
}

impl CloseCode {
    /// Convert from a u16 code. Codes the server never sends map to `None`.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1008 => Some(Self::PolicyViolation),
            1011 => Some(Self::InternalError),
            _ => None,
        }
    }

    /// Get the u16 value of this close code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::PolicyViolation => "PolicyViolation",
            Self::InternalError => "InternalError",
        };
        write!(f, "{} ({})", name, self.as_u16())
    }
}
