//! WebSocket opening handshake.
//!
//! The acceptor treats the handshake as an opaque, fallible step that turns a
//! raw byte stream into a message-oriented [`WebSocketStream`]. [`Handshake`]
//! is the seam; [`TungsteniteHandshake`] is the RFC 6455 implementation
//! backed by `tokio-tungstenite`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::trace;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::config::ConnectionConfig;
use crate::error::{WsError, WsResult};

/// A completed handshake.
#[derive(Debug)]
pub struct Upgraded<S> {
    /// The upgraded stream.
    pub stream: WebSocketStream<S>,
    /// Request path the client upgraded on.
    pub path: String,
}

/// Upgrades a raw stream to a WebSocket stream.
///
/// A failed handshake must leave nothing behind: the stream is dropped and no
/// connection is created.
pub trait Handshake<S>: Send + Sync + 'static {
    /// Perform the handshake on `stream`.
    fn upgrade(&self, stream: S) -> BoxFuture<'static, WsResult<Upgraded<S>>>;
}

/// Server-side RFC 6455 handshake with a timeout.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteHandshake {
    config: ConnectionConfig,
}

impl TungsteniteHandshake {
    /// Create a handshake using the limits from `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// The time a client has to complete the handshake.
    pub fn timeout(&self) -> Duration {
        self.config.handshake_timeout
    }
}

impl<S> Handshake<S> for TungsteniteHandshake
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn upgrade(&self, stream: S) -> BoxFuture<'static, WsResult<Upgraded<S>>> {
        let protocol = self.config.protocol_config();
        let timeout = self.config.handshake_timeout;

        async move {
            let mut path = String::from("/");
            let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                path = request.uri().path().to_string();
                Ok(response)
            };

            let accept =
                tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(protocol));
            let stream = match tokio::time::timeout(timeout, accept).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(WsError::handshake_failed(e.to_string())),
                Err(_) => {
                    return Err(WsError::HandshakeTimeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            };

            trace!(path = %path, "Handshake complete");
            Ok(Upgraded { stream, path })
        }
        .boxed()
    }
}
