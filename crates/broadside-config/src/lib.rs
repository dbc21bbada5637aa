//! Typed, layered configuration for Broadside.
//!
//! - TOML and JSON files, unknown keys rejected
//! - Environment overrides in the form `PREFIX__SECTION__KEY`
//! - Validation after all layers are applied
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! max_queue_per_connection = 1024
//! shutdown_grace_ms = 5000
//! handshake_timeout_ms = 10000
//! max_message_size = 16777216
//! broadcast_chunk_size = 512
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ansi = false
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [broadcast]
//! interval_secs = 5
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `BROADSIDE__SERVER__PORT=9000`
//! - `BROADSIDE__LOGGING__FORMAT=pretty`
//! - `BROADSIDE__METRICS__ENABLED=true`

mod config;
mod error;
mod loader;
mod schema;

pub use config::BroadsideConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{BroadcastSection, LoggingSection, MetricsSection, ServerSection};

/// Default prefix for environment overrides.
pub const ENV_PREFIX: &str = "BROADSIDE";
