//! Broadcast engine.
//!
//! A broadcast takes a snapshot of the registry, converts the message into a
//! frame once and enqueues it on every connection in the snapshot. Enqueueing
//! never waits on the network. A connection that cannot accept the message is
//! closed and removed from the registry before the broadcast returns, and the
//! other recipients are unaffected.
//!
//! Only text and binary messages can be broadcast. Anything else is refused
//! with [`WsError::InvalidMessage`] before any connection is touched.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::field::Empty;
use tracing::{debug, error, instrument, trace, Span};

use crate::connection::{ConnectionHandle, ConnectionId, Frame};
use crate::error::{WsError, WsResult};
use crate::message::Message;
use crate::registry::ConnectionRegistry;

/// Default number of connections handled by one delivery task.
pub const DEFAULT_BROADCAST_CHUNK_SIZE: usize = 512;

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Connections the message was enqueued on.
    pub sent: usize,
    /// Connections that were evicted instead.
    pub failed: usize,
}

impl BroadcastStats {
    /// Size of the snapshot the broadcast was delivered to.
    pub fn total(&self) -> usize {
        self.sent + self.failed
    }

    /// Check if every recipient accepted the message.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    fn merge(&mut self, other: Self) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

/// Fans messages out to registered connections.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    chunk_size: usize,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            chunk_size: DEFAULT_BROADCAST_CHUNK_SIZE,
        }
    }

    /// Set how many connections one delivery task handles. Minimum 1.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The registry this broadcaster delivers to.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver a message to every connection registered right now.
    ///
    /// Snapshots larger than the chunk size are split across tasks so
    /// delivery runs concurrently. Returns once the message has been enqueued
    /// or the recipient evicted for every connection in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidMessage`] for ping, pong and close messages.
    #[instrument(name = "broadcast", skip_all, fields(kind = Empty, len = Empty))]
    pub async fn broadcast(&self, message: impl Into<Message>) -> WsResult<BroadcastStats> {
        let message = message.into();
        let span = Span::current();
        span.record("kind", message.kind());
        span.record("len", message.len());

        let (frame, mut targets) = self.prepare(message)?;
        if targets.len() <= self.chunk_size {
            return Ok(self.finish(deliver(&targets, &frame)));
        }

        let mut tasks = JoinSet::new();
        while !targets.is_empty() {
            let rest = targets.split_off(self.chunk_size.min(targets.len()));
            let chunk = std::mem::replace(&mut targets, rest);
            let frame = frame.clone();
            tasks.spawn(async move { deliver(&chunk, &frame) });
        }

        let mut stats = BroadcastStats::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(chunk) => stats.merge(chunk),
                Err(e) => error!(error = %e, "Broadcast delivery task failed"),
            }
        }
        Ok(self.finish(stats))
    }

    /// Deliver a message sequentially on the calling thread.
    ///
    /// Same guarantees and errors as [`broadcast`](Self::broadcast), usable
    /// from synchronous code such as message handlers.
    pub fn broadcast_now(&self, message: impl Into<Message>) -> WsResult<BroadcastStats> {
        let (frame, targets) = self.prepare(message.into())?;
        Ok(self.finish(deliver(&targets, &frame)))
    }

    /// Deliver a message to a single connection.
    ///
    /// A connection that cannot accept the message is evicted, the same as
    /// during a broadcast. A refused message kind evicts nobody.
    pub fn send_to(&self, id: &ConnectionId, message: impl Into<Message>) -> WsResult<()> {
        let frame = message.into().into_data_frame()?;
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| WsError::connection_closed(*id))?;

        let result = handle.enqueue_frame(frame);
        if let Err(e) = &result {
            evicted(&handle, e);
        }
        result
    }

    fn prepare(&self, message: Message) -> WsResult<(Frame, Vec<ConnectionHandle>)> {
        Ok((message.into_data_frame()?, self.registry.snapshot()))
    }

    fn finish(&self, stats: BroadcastStats) -> BroadcastStats {
        counter!("broadside_broadcasts_total").increment(1);
        counter!("broadside_broadcast_sent_total").increment(stats.sent as u64);
        counter!("broadside_broadcast_failed_total").increment(stats.failed as u64);
        debug!(sent = stats.sent, failed = stats.failed, "Broadcast delivered");
        stats
    }
}

fn deliver(targets: &[ConnectionHandle], frame: &Frame) -> BroadcastStats {
    let mut stats = BroadcastStats::default();
    for handle in targets {
        // Cloning a frame only bumps the payload's reference count.
        match handle.enqueue_frame(frame.clone()) {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                stats.failed += 1;
                evicted(handle, &e);
            }
        }
    }
    stats
}

/// Record a failed send.
///
/// The failing enqueue has already closed the connection, which took it out
/// of the registry. Only the send that overflowed the queue counts as the
/// eviction.
fn evicted(handle: &ConnectionHandle, err: &WsError) {
    if matches!(err, WsError::QueueOverflow { .. }) {
        counter!("broadside_evictions_total").increment(1);
        debug!(connection_id = %handle.id(), error = %err, "Connection evicted");
    } else {
        trace!(connection_id = %handle.id(), error = %err, "Skipped closing connection");
    }
}
