//! Connection handling.
//!
//! Every accepted client is split into two parts:
//!
//! - [`Connection`] owns the transport. It is moved into the connection's
//!   task and runs the inbound and outbound flows until the connection closes.
//! - [`ConnectionHandle`] is a cheap, cloneable reference stored in the
//!   registry. It is the only way other components reach the client: they
//!   [`enqueue`](ConnectionHandle::enqueue) onto its bounded outbound queue or
//!   ask it to [`close`](ConnectionHandle::close).
//!
//! ```text
//!  Connecting ──register──► Open ──failure / close()──► Closing ──drained──► Closed
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::config::ConnectionConfig;
use crate::error::{CloseCode, WsError, WsResult};
use crate::handler::{MessageContext, MessageHandler};
use crate::message::Message;
use crate::registry::{ConnectionRegistry, Registration};

/// Frame type carried by outbound queues.
pub(crate) type Frame = tungstenite::Message;

/// A unique identifier for a connection.
///
/// IDs are UUIDv7 values: time ordered and never reused while the process
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Low bits of the packed state word hold the [`ConnectionState`], the bits
/// above hold the [`CloseReason`] (0 while none is recorded).
const STATE_MASK: u8 = 0b11;
const REASON_SHIFT: u32 = 2;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Upgraded but not yet registered.
    Connecting = 0,
    /// Registered and accepting outbound messages.
    Open = 1,
    /// Shutting down; queued messages are flushed best-effort.
    Closing = 2,
    /// Terminal. The transport has been released.
    Closed = 3,
}

impl ConnectionState {
    fn from_bits(bits: u8) -> Self {
        match bits & STATE_MASK {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection left the `Open` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended.
    PeerClosed = 1,
    /// Reading from the transport failed.
    ReadError = 2,
    /// Writing to the transport failed.
    WriteError = 3,
    /// The outbound queue was full, so the connection was evicted.
    QueueOverflow = 4,
    /// The server is shutting down.
    Shutdown = 5,
    /// Closed explicitly through its handle.
    Requested = 6,
}

impl CloseReason {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits >> REASON_SHIFT {
            1 => Some(Self::PeerClosed),
            2 => Some(Self::ReadError),
            3 => Some(Self::WriteError),
            4 => Some(Self::QueueOverflow),
            5 => Some(Self::Shutdown),
            6 => Some(Self::Requested),
            _ => None,
        }
    }

    fn to_bits(self) -> u8 {
        (self as u8) << REASON_SHIFT
    }

    /// Close code sent to the peer for this reason.
    pub fn close_code(self) -> CloseCode {
        match self {
            Self::PeerClosed | Self::Requested => CloseCode::Normal,
            Self::Shutdown => CloseCode::GoingAway,
            Self::QueueOverflow => CloseCode::PolicyViolation,
            Self::ReadError | Self::WriteError => CloseCode::InternalError,
        }
    }

    /// Whether queued messages should still be flushed before closing.
    fn drains_queue(self) -> bool {
        matches!(self, Self::Shutdown | Self::Requested)
    }

    /// Whether the transport is still worth writing a close frame to.
    fn writes_close_frame(self) -> bool {
        !matches!(self, Self::ReadError | Self::WriteError | Self::PeerClosed)
    }

    fn describe(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer closed",
            Self::ReadError => "read error",
            Self::WriteError => "write error",
            Self::QueueOverflow => "outbound queue overflow",
            Self::Shutdown => "server shutting down",
            Self::Requested => "closed by server",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// State shared between a [`Connection`] and all of its handles.
#[derive(Debug)]
struct Shared {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    path: String,
    connected_at: Instant,
    capacity: usize,
    /// State and close reason, updated together.
    state: AtomicU8,
    registry: OnceLock<Weak<ConnectionRegistry>>,
    outbound: mpsc::Sender<Frame>,
    close_tx: watch::Sender<bool>,
}

/// A cloneable reference to a live connection.
///
/// Handles never touch the transport. Outbound messages go through a bounded
/// FIFO queue drained by the connection's own task, so the order in which a
/// connection receives messages is exactly the order they were enqueued.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    fn new(
        capacity: usize,
        peer_addr: Option<SocketAddr>,
        path: String,
    ) -> (Self, mpsc::Receiver<Frame>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(false);
        let shared = Shared {
            id: ConnectionId::new(),
            peer_addr,
            path,
            connected_at: Instant::now(),
            capacity,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            registry: OnceLock::new(),
            outbound,
            close_tx,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            outbound_rx,
            close_rx,
        )
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Remote address of the client, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// Request path the client upgraded on.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_bits(self.shared.state.load(Ordering::Acquire))
    }

    /// Check if the connection accepts outbound messages.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Why the connection closed, once it started closing.
    pub fn close_reason(&self) -> Option<CloseReason> {
        CloseReason::from_bits(self.shared.state.load(Ordering::Acquire))
    }

    /// How long the connection has been established.
    pub fn age(&self) -> Duration {
        self.shared.connected_at.elapsed()
    }

    /// Maximum number of queued outbound messages.
    pub fn queue_capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.shared.capacity - self.shared.outbound.capacity()
    }

    /// Append a message to the outbound queue.
    ///
    /// Never waits: a full queue means the client is not keeping up, so the
    /// connection is moved to `Closing` and [`WsError::QueueOverflow`] is
    /// returned. Enqueueing on a connection that is not open fails with
    /// [`WsError::ConnectionClosed`]. Only text and binary messages are
    /// accepted; anything else fails with [`WsError::InvalidMessage`] and
    /// leaves the connection untouched.
    pub fn enqueue(&self, message: impl Into<Message>) -> WsResult<()> {
        self.enqueue_frame(message.into().into_data_frame()?)
    }

    /// Only the call that overflows the queue reports `QueueOverflow`; any
    /// other caller sees the connection as closed.
    pub(crate) fn enqueue_frame(&self, frame: Frame) -> WsResult<()> {
        if !self.is_open() {
            return Err(WsError::connection_closed(self.id()));
        }

        match self.shared.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                if self.close(CloseReason::QueueOverflow) {
                    Err(WsError::queue_overflow(self.id(), self.shared.capacity))
                } else {
                    Err(WsError::connection_closed(self.id()))
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close(CloseReason::WriteError);
                Err(WsError::connection_closed(self.id()))
            }
        }
    }

    /// Ask the connection to close.
    ///
    /// Returns `true` if this call moved the connection from `Open` to
    /// `Closing`; repeated or late calls are no-ops. The winning call records
    /// `reason` in the same atomic step and takes the connection out of its
    /// registry before returning, so a closing connection is never part of a
    /// later broadcast.
    pub fn close(&self, reason: CloseReason) -> bool {
        let initiated = self
            .shared
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8 | reason.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !initiated {
            return false;
        }

        debug!(connection_id = %self.id(), reason = %reason, "Connection closing");
        if let Some(registry) = self.shared.registry.get().and_then(Weak::upgrade) {
            registry.remove(&self.id());
        }
        self.shared.close_tx.send_replace(true);
        true
    }

    /// Remember the registry this connection is inserted into.
    pub(crate) fn attach(&self, registry: Weak<ConnectionRegistry>) {
        let _ = self.shared.registry.set(registry);
    }

    /// Move from `Connecting` to `Open`. Called by the registry on insert.
    pub(crate) fn open(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Enter the terminal state, keeping the recorded close reason.
    pub(crate) fn mark_closed(&self) {
        let closed = ConnectionState::Closed as u8;
        let updated = self
            .shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current & STATE_MASK == closed {
                    return None;
                }
                let reason = match current & !STATE_MASK {
                    0 => CloseReason::Requested.to_bits(),
                    bits => bits,
                };
                Some(closed | reason)
            });
        if updated.is_ok() {
            self.shared.close_tx.send_replace(true);
        }
    }

    /// A handle with no transport behind it, for exercising queues directly.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (handle, outbound_rx, _close_rx) = Self::new(capacity, None, "/".to_string());
        (handle, outbound_rx)
    }
}

/// The task-owned half of a connection.
///
/// Created from an upgraded stream, registered, then consumed by
/// [`run`](Connection::run).
pub struct Connection<S> {
    handle: ConnectionHandle,
    stream: WebSocketStream<S>,
    outbound: mpsc::Receiver<Frame>,
    close_rx: watch::Receiver<bool>,
    close_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an upgraded stream.
    pub fn new(
        stream: WebSocketStream<S>,
        config: &ConnectionConfig,
        peer_addr: Option<SocketAddr>,
        path: impl Into<String>,
    ) -> Self {
        let capacity = config.max_queue_per_connection.max(1);
        let (handle, outbound, close_rx) = ConnectionHandle::new(capacity, peer_addr, path.into());
        Self {
            handle,
            stream,
            outbound,
            close_rx,
            close_timeout: config.close_timeout,
        }
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Get a handle for this connection.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Close a connection that was never registered.
    pub async fn reject(self, code: CloseCode, reason: &str) {
        let Self {
            handle, mut stream, ..
        } = self;
        let frame = Message::close(code, reason).into_frame();
        if stream.send(frame).await.is_ok() {
            let _ = SinkExt::close(&mut stream).await;
        }
        handle.mark_closed();
        debug!(connection_id = %handle.id(), code = %code, "Connection rejected");
    }

    /// Run the connection until it closes.
    ///
    /// The inbound flow dispatches text and binary messages to `handler`;
    /// the outbound flow writes queued frames in order. Whichever flow stops
    /// first (or an external [`close`](ConnectionHandle::close)) moves the
    /// connection to `Closing`, after which it leaves the registry, flushes
    /// what it can within the close timeout and ends `Closed`.
    #[instrument(
        name = "connection",
        skip_all,
        fields(connection_id = %self.handle.id(), peer_addr = ?self.handle.peer_addr())
    )]
    pub async fn run(
        self,
        registration: Registration,
        handler: &dyn MessageHandler,
        broadcaster: &Broadcaster,
    ) -> CloseReason {
        let Self {
            handle,
            stream,
            mut outbound,
            close_rx,
            close_timeout,
        } = self;
        let (mut sink, mut source) = stream.split();

        handler.on_open(&handle);

        let outcome = {
            let writer = write_loop(&mut sink, &mut outbound, close_rx.clone());
            let reader = read_loop(&mut source, &handle, handler, broadcaster, close_rx);
            tokio::select! {
                result = writer => result.map(|()| None),
                result = reader => result,
            }
        };
        let stopped = match outcome {
            Ok(stopped) => stopped,
            Err(e) => {
                let reason = if matches!(e, WsError::SendFailed(_)) {
                    CloseReason::WriteError
                } else {
                    CloseReason::ReadError
                };
                debug!(error = %e, reason = %reason, "Transport failed");
                Some(reason)
            }
        };

        if let Some(reason) = stopped {
            handle.close(reason);
        }
        let reason = handle
            .close_reason()
            .or(stopped)
            .unwrap_or(CloseReason::Requested);

        registration.deregister();

        if tokio::time::timeout(close_timeout, finish(&mut sink, &mut outbound, reason))
            .await
            .is_err()
        {
            debug!("Close drain timed out");
        }

        outbound.close();
        drop(registration);
        handler.on_close(&handle, reason);
        debug!(reason = %reason, "Connection closed");
        reason
    }
}

type Sink<S> = SplitSink<WebSocketStream<S>, Frame>;
type Source<S> = SplitStream<WebSocketStream<S>>;

/// Drain the outbound queue onto the transport in FIFO order.
///
/// Returns `Ok` when stopped by the close signal.
async fn write_loop<S>(
    sink: &mut Sink<S>,
    outbound: &mut mpsc::Receiver<Frame>,
    mut close_rx: watch::Receiver<bool>,
) -> WsResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closed| *closed) => return Ok(()),
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        // Batch whatever else is already queued behind this frame.
        sink.feed(frame).await.map_err(WsError::SendFailed)?;
        while let Ok(frame) = outbound.try_recv() {
            sink.feed(frame).await.map_err(WsError::SendFailed)?;
        }
        sink.flush().await.map_err(WsError::SendFailed)?;
    }
}

/// Read frames and hand data messages to the handler.
///
/// Returns `Ok(None)` when stopped by the close signal.
async fn read_loop<S>(
    source: &mut Source<S>,
    handle: &ConnectionHandle,
    handler: &dyn MessageHandler,
    broadcaster: &Broadcaster,
    mut close_rx: watch::Receiver<bool>,
) -> WsResult<Option<CloseReason>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ctx = MessageContext::new(handle, broadcaster);
    loop {
        let next = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closed| *closed) => return Ok(None),
            next = source.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                let message = Message::from(frame);
                match message {
                    Message::Close(frame) => {
                        trace!(?frame, "Received close frame");
                        return Ok(Some(CloseReason::PeerClosed));
                    }
                    Message::Text(_) | Message::Binary(_) => {
                        counter!("broadside_messages_received_total").increment(1);
                        trace!(kind = message.kind(), len = message.len(), "Received message");
                        handler.on_message(&ctx, message);
                    }
                    // Pings are answered by the codec.
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Some(Err(e)) => return Err(WsError::ReceiveFailed(e)),
            None => return Ok(Some(CloseReason::PeerClosed)),
        }
    }
}

/// Best-effort flush of queued frames followed by a close frame.
async fn finish<S>(sink: &mut Sink<S>, outbound: &mut mpsc::Receiver<Frame>, reason: CloseReason)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if reason.drains_queue() {
        while let Ok(frame) = outbound.try_recv() {
            if sink.feed(frame).await.is_err() {
                return;
            }
        }
    }

    if reason.writes_close_frame() {
        let frame = Message::close(reason.close_code(), reason.describe()).into_frame();
        if sink.send(frame).await.is_err() {
            return;
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IgnoreHandler;
    use crate::registry::ConnectionRegistry;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tungstenite::protocol::Role;

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display() {
        let uuid = Uuid::now_v7();
        let id = ConnectionId::from(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn test_new_handle_is_connecting() {
        let (handle, _rx) = ConnectionHandle::detached(4);
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(handle.enqueue("early").is_err());
    }

    #[test]
    fn test_enqueue_until_overflow() {
        let (handle, _rx) = ConnectionHandle::detached(2);
        assert!(handle.open());

        handle.enqueue("one").unwrap();
        handle.enqueue("two").unwrap();
        assert_eq!(handle.queued(), 2);

        let err = handle.enqueue("three").unwrap_err();
        assert!(matches!(err, WsError::QueueOverflow { capacity: 2, .. }));
        assert_eq!(handle.state(), ConnectionState::Closing);
        assert_eq!(handle.close_reason(), Some(CloseReason::QueueOverflow));

        // Closing connections refuse further messages instead of dropping them.
        let err = handle.enqueue("four").unwrap_err();
        assert!(matches!(err, WsError::ConnectionClosed { .. }));
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let (handle, mut rx) = ConnectionHandle::detached(8);
        handle.open();

        for text in ["m1", "m2", "m3"] {
            handle.enqueue(text).unwrap();
        }

        let received: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| frame.to_text().unwrap().to_string())
            .collect();
        assert_eq!(received, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (handle, _rx) = ConnectionHandle::detached(1);
        handle.open();

        assert!(handle.close(CloseReason::Requested));
        assert!(!handle.close(CloseReason::Shutdown));
        assert_eq!(handle.close_reason(), Some(CloseReason::Requested));

        handle.mark_closed();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(!handle.close(CloseReason::Shutdown));
        assert!(matches!(
            handle.enqueue("late"),
            Err(WsError::ConnectionClosed { .. })
        ));
    }

    #[test]
    fn test_enqueue_refuses_control_messages() {
        let (handle, mut rx) = ConnectionHandle::detached(4);
        handle.open();

        let err = handle
            .enqueue(Message::close(CloseCode::Normal, "bye"))
            .unwrap_err();
        assert!(matches!(err, WsError::InvalidMessage { kind: "close" }));
        let err = handle.enqueue(Message::Ping(Default::default())).unwrap_err();
        assert!(matches!(err, WsError::InvalidMessage { kind: "ping" }));

        assert!(handle.is_open());
        assert_eq!(handle.queued(), 0);
        assert!(rx.try_recv().is_err());
        handle.enqueue("still open").unwrap();
    }

    #[test]
    fn test_concurrent_close_records_winning_reason() {
        let reasons = [
            CloseReason::WriteError,
            CloseReason::Shutdown,
            CloseReason::Requested,
            CloseReason::QueueOverflow,
        ];

        for _ in 0..200 {
            let (handle, _rx) = ConnectionHandle::detached(1);
            handle.open();
            let barrier = std::sync::Barrier::new(reasons.len());

            let winners: Vec<CloseReason> = std::thread::scope(|scope| {
                let racers: Vec<_> = reasons
                    .iter()
                    .map(|&reason| {
                        let (handle, barrier) = (&handle, &barrier);
                        scope.spawn(move || {
                            barrier.wait();
                            handle.close(reason).then_some(reason)
                        })
                    })
                    .collect();
                racers
                    .into_iter()
                    .filter_map(|racer| racer.join().unwrap())
                    .collect()
            });

            assert_eq!(winners.len(), 1);
            assert_eq!(handle.close_reason(), Some(winners[0]));
            assert_eq!(handle.state(), ConnectionState::Closing);
        }
    }

    #[test]
    fn test_mark_closed_keeps_reason() {
        let (handle, _rx) = ConnectionHandle::detached(1);
        handle.open();
        handle.close(CloseReason::QueueOverflow);
        handle.mark_closed();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(handle.close_reason(), Some(CloseReason::QueueOverflow));

        let (never_opened, _rx) = ConnectionHandle::detached(1);
        assert_eq!(never_opened.close_reason(), None);
        never_opened.mark_closed();
        assert_eq!(never_opened.close_reason(), Some(CloseReason::Requested));
    }

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(CloseReason::Shutdown.close_code(), CloseCode::GoingAway);
        assert_eq!(CloseReason::QueueOverflow.close_code(), CloseCode::PolicyViolation);
        assert_eq!(CloseReason::PeerClosed.close_code(), CloseCode::Normal);
        assert!(CloseReason::Shutdown.drains_queue());
        assert!(!CloseReason::QueueOverflow.drains_queue());
        assert!(!CloseReason::WriteError.writes_close_frame());
    }

    #[tokio::test]
    async fn test_run_writes_in_enqueue_order() {
        let (server, mut client) = ws_pair().await;
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let connection = Connection::new(server, &ConnectionConfig::default(), None, "/");
        let handle = connection.handle();
        let registration = registry.register(&handle).unwrap();

        let task = tokio::spawn(async move {
            connection
                .run(registration, &IgnoreHandler, &broadcaster)
                .await
        });

        for text in ["m1", "m2", "m3"] {
            handle.enqueue(text).unwrap();
        }

        for expected in ["m1", "m2", "m3"] {
            let frame = client.next().await.unwrap().unwrap();
            assert_eq!(frame.to_text().unwrap(), expected);
        }

        handle.close(CloseReason::Requested);
        let reason = task.await.unwrap();
        assert_eq!(reason, CloseReason::Requested);
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_peer_close_deregisters() {
        let (server, mut client) = ws_pair().await;
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let connection = Connection::new(server, &ConnectionConfig::default(), None, "/");
        let handle = connection.handle();
        let registration = registry.register(&handle).unwrap();
        assert_eq!(registry.len(), 1);

        let task = tokio::spawn(async move {
            connection
                .run(registration, &IgnoreHandler, &broadcaster)
                .await
        });

        client.close(None).await.unwrap();

        let reason = task.await.unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
        assert!(registry.is_empty());
        assert!(handle.enqueue("after close").is_err());
    }

    #[tokio::test]
    async fn test_protocol_violation_is_read_error() {
        let (server_io, mut client_io) = tokio::io::duplex(1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let connection = Connection::new(server, &ConnectionConfig::default(), None, "/");
        let handle = connection.handle();
        let registration = registry.register(&handle).unwrap();

        // Clients must mask their frames.
        client_io.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();

        let reason = connection
            .run(registration, &IgnoreHandler, &broadcaster)
            .await;
        assert_eq!(reason, CloseReason::ReadError);
        assert_eq!(handle.close_reason(), Some(CloseReason::ReadError));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queue_then_closes() {
        let (server, mut client) = ws_pair().await;
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let connection = Connection::new(server, &ConnectionConfig::default(), None, "/");
        let handle = connection.handle();
        let registration = registry.register(&handle).unwrap();

        handle.enqueue("last words").unwrap();
        handle.close(CloseReason::Shutdown);

        let reason = connection
            .run(registration, &IgnoreHandler, &broadcaster)
            .await;
        assert_eq!(reason, CloseReason::Shutdown);

        let frame = client.next().await.unwrap().unwrap();
        assert_eq!(frame.to_text().unwrap(), "last words");

        let frame = client.next().await.unwrap().unwrap();
        match Message::from(frame) {
            Message::Close(Some(close)) => assert_eq!(close.code, 1001),
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
