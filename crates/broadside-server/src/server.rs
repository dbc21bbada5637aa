//! Server facade.
//!
//! [`Server`] ties the listener, registry and broadcast engine together
//! behind a small lifecycle API: construct, [`start`](Server::start),
//! [`broadcast`](Server::broadcast), [`stop`](Server::stop).
//!
//! # Example
//!
//! ```rust,ignore
//! use broadside_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(8080);
//!     server.start().await?;
//!
//!     let stats = server.broadcast("hello").await?;
//!     println!("sent to {} clients", stats.sent);
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broadside_ws::{
    BroadcastStats, Broadcaster, ConnectionId, ConnectionRegistry, Message, MessageHandler,
    RegistryStats, RelayHandler, TungsteniteHandshake,
};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ServerConfig, ServerConfigBuilder};
use crate::error::{ServerError, ServerResult};
use crate::listener::{self, Acceptor, ConnectionContext, TcpHandshake};
use crate::shutdown::ShutdownSignal;

/// State of one `start`..`stop` run.
#[derive(Debug)]
struct Running {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
}

/// The Broadside WebSocket broadcast server.
///
/// Constructing a server performs no I/O. Each [`start`](Self::start) binds a
/// fresh listener and registry; [`stop`](Self::stop) tears them down again,
/// after which the server may be started once more.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn MessageHandler>,
    handshake: TcpHandshake,
    running: RwLock<Option<Running>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Create a server listening on `port` with default settings.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self::builder().port(port).build()
    }

    /// Create a server from a configuration.
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Creates a new server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the configured port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.config.port()
    }

    /// Returns the bound address while running.
    ///
    /// Differs from the configured port when listening on port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.read().as_ref().map(|running| running.local_addr)
    }

    /// Returns `true` between a successful `start` and the next `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.read().is_some()
    }

    /// Number of open connections; zero when not running.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.running
            .read()
            .as_ref()
            .map_or(0, |running| running.registry.len())
    }

    /// IDs of the open connections; empty when not running.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.running
            .read()
            .as_ref()
            .map(|running| running.registry.connection_ids())
            .unwrap_or_default()
    }

    /// Registry statistics for the current run.
    #[must_use]
    pub fn stats(&self) -> Option<RegistryStats> {
        self.running
            .read()
            .as_ref()
            .map(|running| running.registry.stats())
    }

    /// Bind and begin accepting connections.
    ///
    /// Returns once the socket is listening, not once a client connects.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if the server is running
    /// - [`ServerError::InvalidAddress`] if the host cannot be parsed
    /// - [`ServerError::Bind`] if the socket cannot be bound
    pub async fn start(&self) -> ServerResult<()> {
        let mut acceptor = self.acceptor.lock().await;
        if acceptor.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.config.socket_addr()?;
        let tcp = listener::bind(addr).await?;
        let local_addr = tcp
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(Arc::clone(&registry))
            .with_chunk_size(self.config.broadcast_chunk_size());
        let shutdown = ShutdownSignal::new();

        let context = ConnectionContext {
            registry: Arc::clone(&registry),
            broadcaster: broadcaster.clone(),
            handler: Arc::clone(&self.handler),
            handshake: Arc::clone(&self.handshake),
            connection_config: self.config.connection_config(),
            shutdown: shutdown.clone(),
        };
        let task = Acceptor::new(tcp, context, self.config.shutdown_grace());

        *self.running.write() = Some(Running {
            registry,
            broadcaster,
            local_addr,
            shutdown,
        });
        *acceptor = Some(tokio::spawn(task.run()));

        info!(addr = %local_addr, "Server listening");
        Ok(())
    }

    /// Stop accepting, close every connection and release the socket.
    ///
    /// Waits for connections to close for at most the configured shutdown
    /// grace period, then drops the rest. Calling `stop` on a server that is
    /// not running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the accept task panicked.
    pub async fn stop(&self) -> ServerResult<()> {
        let mut acceptor = self.acceptor.lock().await;
        let Some(task) = acceptor.take() else {
            return Ok(());
        };

        let running = self.running.write().take();
        if let Some(running) = &running {
            info!(
                addr = %running.local_addr,
                connections = running.registry.len(),
                "Stopping server"
            );
            running.shutdown.trigger();
        }

        task.await
            .map_err(|e| ServerError::Internal(format!("accept task failed: {e}")))?;

        if let Some(running) = running {
            if !running.registry.is_empty() {
                warn!(remaining = running.registry.len(), "Connections left after stop");
            }
        }
        info!("Server stopped");
        Ok(())
    }

    /// Deliver a message to every open connection.
    ///
    /// Clients that cannot take the message are evicted and counted in
    /// [`BroadcastStats::failed`]; they never fail the call.
    ///
    /// # Errors
    ///
    /// - [`ServerError::NotRunning`] before `start` or after `stop`
    /// - [`ServerError::Connection`] wrapping
    ///   [`WsError::InvalidMessage`](broadside_ws::WsError::InvalidMessage) for
    ///   ping, pong and close messages, which reach no client
    pub async fn broadcast(&self, message: impl Into<Message>) -> ServerResult<BroadcastStats> {
        let broadcaster = self.broadcaster()?;
        Ok(broadcaster.broadcast(message).await?)
    }

    /// Deliver a message to one connection.
    ///
    /// # Errors
    ///
    /// - [`ServerError::NotRunning`] before `start` or after `stop`
    /// - [`ServerError::Connection`] if the connection is unknown or was
    ///   evicted because it could not take the message
    pub fn send_to(&self, id: &ConnectionId, message: impl Into<Message>) -> ServerResult<()> {
        let broadcaster = self.broadcaster()?;
        broadcaster.send_to(id, message)?;
        Ok(())
    }

    fn broadcaster(&self) -> ServerResult<Broadcaster> {
        self.running
            .read()
            .as_ref()
            .map(|running| running.broadcaster.clone())
            .ok_or(ServerError::NotRunning)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.trigger();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config_builder: ServerConfigBuilder,
    config: Option<ServerConfig>,
    handler: Arc<dyn MessageHandler>,
    handshake: Option<TcpHandshake>,
}

impl ServerBuilder {
    /// Creates a builder with default settings and the relay handler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_builder: ServerConfigBuilder::new(),
            config: None,
            handler: Arc::new(RelayHandler),
            handshake: None,
        }
    }

    /// Use a complete configuration, replacing individual settings.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the listen host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.host(host);
        self
    }

    /// Sets the listen port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config_builder = self.config_builder.port(port);
        self
    }

    /// Sets the outbound queue depth per connection.
    #[must_use]
    pub fn max_queue_per_connection(mut self, depth: usize) -> Self {
        self.config_builder = self.config_builder.max_queue_per_connection(depth);
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config_builder = self.config_builder.shutdown_grace(grace);
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.handshake_timeout(timeout);
        self
    }

    /// Sets the handler for inbound messages.
    #[must_use]
    pub fn handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Replaces the WebSocket handshake.
    #[must_use]
    pub fn handshake(mut self, handshake: TcpHandshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let config = self
            .config
            .unwrap_or_else(|| self.config_builder.build());
        let handshake = self
            .handshake
            .unwrap_or_else(|| Arc::new(TungsteniteHandshake::new(config.connection_config())));

        Server {
            config,
            handler: self.handler,
            handshake,
            running: RwLock::new(None),
            acceptor: Mutex::new(None),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadside_ws::{CloseCode, IgnoreHandler, WsError};

    fn local_server() -> Server {
        Server::builder()
            .port(0)
            .shutdown_grace(Duration::from_millis(500))
            .handler(IgnoreHandler)
            .build()
    }

    #[test]
    fn test_new_performs_no_io() {
        let server = Server::new(8080);
        assert_eq!(server.port(), 8080);
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert_eq!(server.connection_count(), 0);
        assert!(server.stats().is_none());
    }

    #[test]
    fn test_builder_config_wins() {
        let config = ServerConfig::builder().port(4321).build();
        let server = Server::builder().port(1).config(config).build();
        assert_eq!(server.port(), 4321);
    }

    #[tokio::test]
    async fn test_broadcast_before_start_is_not_running() {
        let server = local_server();
        let err = server.broadcast("early").await.unwrap_err();
        assert!(err.is_not_running());
        assert!(server.send_to(&ConnectionId::new(), "early").unwrap_err().is_not_running());
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let server = local_server();
        server.start().await.unwrap();
        assert!(server.is_running());
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));

        let stats = server.broadcast("nobody").await.unwrap();
        assert_eq!(stats, BroadcastStats::default());
        assert!(matches!(
            server.broadcast(Message::close(CloseCode::Normal, "bye")).await,
            Err(ServerError::Connection(WsError::InvalidMessage { kind: "close" }))
        ));

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(server.broadcast("late").await.unwrap_err().is_not_running());

        // Second stop is a no-op.
        server.stop().await.unwrap();

        // A stopped server can be started again.
        server.start().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_ok() {
        let server = local_server();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_host_fails_start() {
        let server = Server::builder().host("nope").port(0).build();
        assert!(matches!(
            server.start().await,
            Err(ServerError::InvalidAddress(_))
        ));
        assert!(!server.is_running());
    }
}
