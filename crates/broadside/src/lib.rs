//! # Broadside
//!
//! A WebSocket broadcast server core. Clients connect, upgrade, and are
//! tracked in a registry; `broadcast` delivers one message to every open
//! connection through bounded per-connection queues. A connection that
//! cannot keep up is evicted without delaying anyone else.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use broadside::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .port(8080)
//!         .max_queue_per_connection(256)
//!         .build();
//!     server.start().await?;
//!
//!     let stats = server.broadcast("hello").await?;
//!     println!("sent {} failed {}", stats.sent, stats.failed);
//!
//!     wait_for_os_signal().await;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TcpListener ─accept─▶ Handshake ─▶ Connection task ─register─▶ Registry
//!                                      ▲ write loop                │
//!                                      │ (bounded queue)           │ snapshot
//!                                      └──────── enqueue ◀── Broadcaster
//! ```

#![doc(html_root_url = "https://docs.rs/broadside/0.1.0")]

pub use broadside_config as config;
pub use broadside_server as server;
pub use broadside_telemetry as telemetry;
pub use broadside_ws as ws;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports.
///
/// ```rust,ignore
/// use broadside::prelude::*;
/// ```
pub mod prelude {
    pub use broadside_server::{
        wait_for_os_signal, Server, ServerBuilder, ServerConfig, ServerError, ServerResult,
        ShutdownSignal,
    };

    pub use broadside_ws::{
        BroadcastStats, CloseCode, CloseReason, ConnectionHandle, ConnectionId, IgnoreHandler,
        Message, MessageContext, MessageHandler, RelayHandler, WsError, WsResult,
    };

    pub use broadside_config::{BroadsideConfig, ConfigLoader};
}
