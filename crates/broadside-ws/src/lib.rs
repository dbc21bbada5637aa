//! Connection core for the Broadside WebSocket broadcast server.
//!
//! This crate owns everything that happens after a TCP stream has been
//! accepted: the opening handshake, per-connection tasks with bounded
//! outbound queues, the registry of open connections and the broadcast
//! engine that fans messages out to them.
//!
//! # Features
//!
//! - **RFC 6455 handshake** using `tokio-tungstenite`, bounded by a timeout
//! - **Bounded FIFO queues** per connection; a full queue evicts the client
//! - **Snapshot broadcasts** that never wait on the network
//! - **Isolate and evict**: one failing client never affects the others
//! - **Pluggable inbound handling** through [`MessageHandler`]
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                                                               │
//! │  TcpStream ──► Handshake::upgrade() ──► Connection::new()     │
//! │                                              │                │
//! │                                              ▼                │
//! │                  ConnectionRegistry::register() ──► Open      │
//! │                                              │                │
//! │           ┌──────────────────────────────────┤                │
//! │           ▼                                  ▼                │
//! │   read loop ──► MessageHandler     write loop ◄── queue       │
//! │                                                  ▲            │
//! │   Broadcaster::broadcast() ── snapshot ── enqueue ┘           │
//! │                                                               │
//! │  On close: leave registry ──► flush ──► close frame ──► Closed│
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use broadside_ws::{
//!     Broadcaster, Connection, ConnectionConfig, ConnectionRegistry, Handshake,
//!     RelayHandler, TungsteniteHandshake,
//! };
//!
//! let registry = ConnectionRegistry::new();
//! let broadcaster = Broadcaster::new(registry.clone());
//! let handshake = TungsteniteHandshake::new(ConnectionConfig::default());
//!
//! let upgraded = handshake.upgrade(tcp_stream).await?;
//! let connection = Connection::new(upgraded.stream, &config, Some(peer), upgraded.path);
//! let registration = registry.register(&connection.handle())?;
//! connection.run(registration, &RelayHandler, &broadcaster).await;
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod registry;

// Re-exports for convenience
pub use broadcast::{BroadcastStats, Broadcaster, DEFAULT_BROADCAST_CHUNK_SIZE};
pub use config::{ConnectionConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_QUEUE_PER_CONNECTION};
pub use connection::{CloseReason, Connection, ConnectionHandle, ConnectionId, ConnectionState};
pub use error::{CloseCode, WsError, WsResult};
pub use handler::{IgnoreHandler, MessageContext, MessageHandler, RelayHandler};
pub use handshake::{Handshake, TungsteniteHandshake, Upgraded};
pub use message::{CloseFrame, Message};
pub use registry::{ConnectionRegistry, Registration, RegistryStats};
