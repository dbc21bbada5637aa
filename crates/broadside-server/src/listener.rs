//! Listener and acceptor.
//!
//! The accept loop hands every accepted TCP stream to its own task, so a slow
//! handshake never delays the next accept. Each task performs the handshake,
//! registers the connection and runs it to completion. When the run's
//! shutdown signal fires the loop stops accepting, closes every connection,
//! waits for them within the grace period and finally releases the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broadside_ws::{
    Broadcaster, CloseCode, CloseReason, Connection, ConnectionConfig, ConnectionRegistry,
    Handshake, MessageHandler, Upgraded, WsError,
};
use metrics::counter;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::shutdown::ShutdownSignal;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Handshake implementation used for TCP clients.
pub type TcpHandshake = Arc<dyn Handshake<TcpStream>>;

/// Bind a listening socket.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is in use or not permitted.
pub async fn bind(addr: SocketAddr) -> ServerResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Everything a connection task needs, shared by all of them.
pub(crate) struct ConnectionContext {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) handshake: TcpHandshake,
    pub(crate) connection_config: ConnectionConfig,
    pub(crate) shutdown: ShutdownSignal,
}

/// Owns the listening socket for one server run.
pub(crate) struct Acceptor {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    shutdown_grace: Duration,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        context: ConnectionContext,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            listener,
            context: Arc::new(context),
            shutdown_grace,
        }
    }

    /// Accept until shutdown, then drain and release the socket.
    pub(crate) async fn run(self) {
        let Self {
            listener,
            context,
            shutdown_grace,
        } = self;
        let shutdown = context.shutdown.clone();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.recv() => break,

                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let context = Arc::clone(&context);
                        connections.spawn(serve_connection(stream, peer_addr, context));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::select! {
                            () = shutdown.recv() => break,
                            () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                        }
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }

        info!("Shutdown signal received, no longer accepting connections");
        drain(&context.registry, &mut connections, shutdown_grace).await;

        drop(listener);
        info!("Listener closed");
    }
}

/// Close every connection and wait for their tasks, forcing teardown once
/// the grace period runs out.
async fn drain(
    registry: &ConnectionRegistry,
    connections: &mut JoinSet<()>,
    grace: Duration,
) {
    let closing = registry.close_all(CloseReason::Shutdown);
    info!(
        connections = closing,
        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
        "Waiting for connections to close"
    );

    let graceful = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
        registry.wait_until_empty().await;
    })
    .await;

    if graceful.is_ok() {
        info!("All connections closed");
        return;
    }

    warn!(
        remaining = registry.len(),
        tasks = connections.len(),
        "Shutdown grace period elapsed, dropping remaining connections"
    );
    connections.shutdown().await;
    registry.clear();
}

/// Handshake, register and run one client.
async fn serve_connection(stream: TcpStream, peer_addr: SocketAddr, context: Arc<ConnectionContext>) {
    let upgraded = tokio::select! {
        result = context.handshake.upgrade(stream) => result,
        () = context.shutdown.recv() => {
            debug!(peer_addr = %peer_addr, "Handshake abandoned for shutdown");
            return;
        }
    };

    let Upgraded { stream, path } = match upgraded {
        Ok(upgraded) => upgraded,
        Err(e) => {
            counter!("broadside_handshake_failures_total").increment(1);
            warn!(peer_addr = %peer_addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let connection = Connection::new(stream, &context.connection_config, Some(peer_addr), path);
    let connection_id = connection.id();
    let registration = match context.registry.register(&connection.handle()) {
        Ok(registration) => registration,
        Err(e) => {
            debug_assert!(
                !matches!(e, WsError::DuplicateConnection { .. }),
                "connection IDs must be unique: {e}"
            );
            let (code, reason) = rejection(&e);
            debug!(connection_id = %connection_id, error = %e, code = %code, "Connection not registered");
            connection.reject(code, reason).await;
            return;
        }
    };

    info!(
        connection_id = %connection_id,
        peer_addr = %peer_addr,
        path = %registration.handle().path(),
        "Client connected"
    );

    let reason = connection
        .run(registration, context.handler.as_ref(), &context.broadcaster)
        .await;

    info!(connection_id = %connection_id, reason = %reason, "Client disconnected");
}

/// Close code and reason sent to a client the registry refused.
///
/// Only a sealed registry means the server is going away; anything else is
/// a fault on our side.
fn rejection(err: &WsError) -> (CloseCode, &'static str) {
    match err {
        WsError::RegistryClosed => (CloseCode::GoingAway, "server shutting down"),
        _ => (CloseCode::InternalError, "connection could not be registered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadside_ws::ConnectionId;

    #[test]
    fn test_rejection_codes() {
        assert_eq!(
            rejection(&WsError::RegistryClosed),
            (CloseCode::GoingAway, "server shutting down")
        );

        let duplicate = WsError::DuplicateConnection {
            connection_id: ConnectionId::new(),
        };
        assert_eq!(rejection(&duplicate).0, CloseCode::InternalError);
        assert_ne!(rejection(&duplicate).1, "server shutting down");

        let closed = WsError::connection_closed(ConnectionId::new());
        assert_eq!(rejection(&closed).0, CloseCode::InternalError);
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();

        match bind(addr).await {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected bind error, got {other:?}"),
        }
    }
}
