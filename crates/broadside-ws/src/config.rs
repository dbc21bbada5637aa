//! Per-connection configuration.
//!
//! [`ConnectionConfig`] bounds the resources a single client may consume:
//! the depth of its outbound queue, frame and message sizes, and how long
//! the handshake and close drain may take.

use std::time::Duration;

use tungstenite::protocol::WebSocketConfig;

/// Default outbound queue depth per connection.
pub const DEFAULT_MAX_QUEUE_PER_CONNECTION: usize = 1024;

/// Default maximum message size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of queued outbound messages before the connection is
    /// evicted (default: 1024).
    pub max_queue_per_connection: usize,
    /// Maximum message size in bytes (default: 16 MiB).
    pub max_message_size: usize,
    /// Maximum frame size in bytes (default: 4 MiB).
    pub max_frame_size: usize,
    /// Time allowed for the opening handshake (default: 10 seconds).
    pub handshake_timeout: Duration,
    /// Time allowed to flush queued messages and the close frame once a
    /// connection starts closing (default: 1 second).
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_queue_per_connection: DEFAULT_MAX_QUEUE_PER_CONNECTION,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: 4 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectionConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outbound queue depth. Values below 1 are raised to 1.
    pub fn max_queue_per_connection(mut self, depth: usize) -> Self {
        self.max_queue_per_connection = depth.max(1);
        self
    }

    /// Set the maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the close drain timeout.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Protocol-level settings handed to the codec.
    ///
    /// Frames are never allowed to exceed the message limit.
    pub fn protocol_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_frame_size.min(self.max_message_size)))
    }
}
