//! # Broadside Server
//!
//! Listener, acceptor and lifecycle management for the Broadside WebSocket
//! broadcast server.
//!
//! - TCP listener bound to the configured address
//! - One task per accepted client (handshake, then its read and write loops)
//! - Broadcasts with isolate-and-evict semantics
//! - Graceful, bounded shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use broadside_server::{Server, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(8080);
//!     server.start().await?;
//!
//!     ShutdownSignal::with_os_signals().recv().await;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use listener::TcpHandshake;
pub use server::{Server, ServerBuilder};
pub use shutdown::{wait_for_os_signal, ShutdownSignal};
