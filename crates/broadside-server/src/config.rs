//! Server configuration types.
//!
//! This module provides configuration for the Broadside server, using the
//! builder pattern for ergonomic construction.
//!
//! # Example
//!
//! ```rust
//! use broadside_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .port(9000)
//!     .max_queue_per_connection(256)
//!     .shutdown_grace(Duration::from_secs(2))
//!     .build();
//!
//! assert_eq!(config.port(), 9000);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use broadside_ws::{
    ConnectionConfig, DEFAULT_BROADCAST_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_MAX_QUEUE_PER_CONNECTION,
};

use crate::error::{ServerError, ServerResult};

/// Default listen host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bound on how long `stop` waits for connections to drain, in
/// milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or IP address to listen on.
    host: String,

    /// Port to listen on. Port 0 asks the OS for a free port.
    port: u16,

    /// Outbound backlog per connection before it is evicted.
    max_queue_per_connection: usize,

    /// Bound on the `stop` drain before remaining connections are dropped.
    shutdown_grace: Duration,

    /// Time a client has to complete the opening handshake.
    handshake_timeout: Duration,

    /// Maximum inbound message size in bytes.
    max_message_size: usize,

    /// Connections handled per broadcast delivery task.
    broadcast_chunk_size: usize,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the listen host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the listen port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the outbound queue depth per connection.
    #[must_use]
    pub fn max_queue_per_connection(&self) -> usize {
        self.max_queue_per_connection
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns the maximum inbound message size.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Returns the broadcast chunk size.
    #[must_use]
    pub fn broadcast_chunk_size(&self) -> usize {
        self.broadcast_chunk_size
    }

    /// Resolves the listen address.
    ///
    /// The host must be an IP literal or `localhost`; no DNS lookups are made.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidAddress`] if the host cannot be parsed.
    pub fn socket_addr(&self) -> ServerResult<SocketAddr> {
        let ip = if self.host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse()
                .map_err(|_| ServerError::InvalidAddress(self.host.clone()))?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Per-connection settings derived from this configuration.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .max_queue_per_connection(self.max_queue_per_connection)
            .max_message_size(self.max_message_size)
            .handshake_timeout(self.handshake_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    host: String,
    port: u16,
    max_queue_per_connection: usize,
    shutdown_grace: Duration,
    handshake_timeout: Duration,
    max_message_size: usize,
    broadcast_chunk_size: usize,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_queue_per_connection: DEFAULT_MAX_QUEUE_PER_CONNECTION,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            broadcast_chunk_size: DEFAULT_BROADCAST_CHUNK_SIZE,
        }
    }

    /// Sets the listen host (an IP literal or `localhost`).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the listen port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets how many outbound messages may queue per connection before it is
    /// evicted. Values below 1 are raised to 1.
    #[must_use]
    pub fn max_queue_per_connection(mut self, depth: usize) -> Self {
        self.max_queue_per_connection = depth.max(1);
        self
    }

    /// Sets the bound on how long `stop` waits for connections to close.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the maximum inbound message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets how many connections one broadcast delivery task handles.
    /// Values below 1 are raised to 1.
    #[must_use]
    pub fn broadcast_chunk_size(mut self, size: usize) -> Self {
        self.broadcast_chunk_size = size.max(1);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            max_queue_per_connection: self.max_queue_per_connection,
            shutdown_grace: self.shutdown_grace,
            handshake_timeout: self.handshake_timeout,
            max_message_size: self.max_message_size,
            broadcast_chunk_size: self.broadcast_chunk_size,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host(), DEFAULT_HOST);
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.max_queue_per_connection(), 1024);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.broadcast_chunk_size(), 512);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ServerConfig::builder()
            .host("0.0.0.0")
            .port(9000)
            .max_queue_per_connection(0)
            .shutdown_grace(Duration::from_millis(250))
            .broadcast_chunk_size(0)
            .build();

        assert_eq!(config.host(), "0.0.0.0");
        assert_eq!(config.port(), 9000);
        assert_eq!(config.max_queue_per_connection(), 1);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
        assert_eq!(config.broadcast_chunk_size(), 1);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig::builder().port(3000).build();
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:3000".parse().unwrap());

        let config = ServerConfig::builder().host("localhost").port(1).build();
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:1".parse().unwrap());

        let config = ServerConfig::builder().host("[::1]").port(2).build();
        assert_eq!(config.socket_addr().unwrap(), "[::1]:2".parse().unwrap());
    }

    #[test]
    fn test_invalid_host() {
        let config = ServerConfig::builder().host("not a host").build();
        assert!(matches!(
            config.socket_addr(),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_connection_config_carries_limits() {
        let config = ServerConfig::builder()
            .max_queue_per_connection(32)
            .max_message_size(4096)
            .handshake_timeout(Duration::from_secs(1))
            .build();
        let connection = config.connection_config();
        assert_eq!(connection.max_queue_per_connection, 32);
        assert_eq!(connection.max_message_size, 4096);
        assert_eq!(connection.handshake_timeout, Duration::from_secs(1));
    }
}
