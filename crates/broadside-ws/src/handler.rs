//! Inbound message handling.
//!
//! Each connection task hands every inbound text or binary message to a
//! [`MessageHandler`]. Handlers run on the connection's task, so they should
//! not block; anything they send goes through the same bounded queues as a
//! broadcast.

use tracing::debug;

use crate::broadcast::{BroadcastStats, Broadcaster};
use crate::connection::{CloseReason, ConnectionHandle, ConnectionId};
use crate::error::WsResult;
use crate::message::Message;

/// What a handler can see and do for one inbound message.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    connection: &'a ConnectionHandle,
    broadcaster: &'a Broadcaster,
}

impl<'a> MessageContext<'a> {
    /// Create a context for a message received on `connection`.
    pub fn new(connection: &'a ConnectionHandle, broadcaster: &'a Broadcaster) -> Self {
        Self {
            connection,
            broadcaster,
        }
    }

    /// The connection the message arrived on.
    pub fn connection(&self) -> &'a ConnectionHandle {
        self.connection
    }

    /// ID of the connection the message arrived on.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// The broadcaster for the registry this connection belongs to.
    pub fn broadcaster(&self) -> &'a Broadcaster {
        self.broadcaster
    }

    /// Send a message back to the sender only.
    pub fn reply(&self, message: impl Into<Message>) -> WsResult<()> {
        self.broadcaster.send_to(&self.connection.id(), message)
    }

    /// Send a message to every open connection, the sender included.
    pub fn broadcast(&self, message: impl Into<Message>) -> WsResult<BroadcastStats> {
        self.broadcaster.broadcast_now(message)
    }
}

/// Reacts to connection lifecycle events and inbound messages.
pub trait MessageHandler: Send + Sync + 'static {
    /// Called once the connection is registered, before any message is read.
    fn on_open(&self, _connection: &ConnectionHandle) {}

    /// Called for every inbound text or binary message.
    fn on_message(&self, ctx: &MessageContext<'_>, message: Message);

    /// Called after the connection has left the registry.
    fn on_close(&self, _connection: &ConnectionHandle, _reason: CloseReason) {}
}

impl<F> MessageHandler for F
where
    F: Fn(&MessageContext<'_>, Message) + Send + Sync + 'static,
{
    fn on_message(&self, ctx: &MessageContext<'_>, message: Message) {
        self(ctx, message);
    }
}

/// Re-broadcasts every inbound message to all open connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayHandler;

impl MessageHandler for RelayHandler {
    fn on_message(&self, ctx: &MessageContext<'_>, message: Message) {
        if let Err(e) = ctx.broadcast(message) {
            debug!(connection_id = %ctx.connection_id(), error = %e, "Relay skipped");
        }
    }
}

/// Discards inbound messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreHandler;

impl MessageHandler for IgnoreHandler {
    fn on_message(&self, _ctx: &MessageContext<'_>, _message: Message) {}
}
