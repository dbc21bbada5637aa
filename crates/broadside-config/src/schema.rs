//! Configuration schema types.
//!
//! Every section rejects unknown keys and fills missing keys with defaults.

use broadside_server::config::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SHUTDOWN_GRACE_MS,
};
use broadside_telemetry::LogFormat;
use broadside_ws::{
    DEFAULT_BROADCAST_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_QUEUE_PER_CONNECTION,
};
use serde::{Deserialize, Serialize};

/// `[server]` section.
///
/// # Example
///
/// ```toml
/// [server]
/// host = "0.0.0.0"
/// port = 8080
/// max_queue_per_connection = 1024
/// shutdown_grace_ms = 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Address to bind (IP literal or "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind. 0 picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Outbound messages a connection may have queued before it is evicted.
    #[serde(default = "default_max_queue")]
    pub max_queue_per_connection: usize,

    /// Upper bound on the time `stop()` waits for connections to drain.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Time allowed for the opening handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Largest inbound message accepted, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Connections handled by one broadcast task.
    #[serde(default = "default_broadcast_chunk_size")]
    pub broadcast_chunk_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_queue_per_connection: default_max_queue(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_message_size: default_max_message_size(),
            broadcast_chunk_size: default_broadcast_chunk_size(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_queue() -> usize {
    DEFAULT_MAX_QUEUE_PER_CONNECTION
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS * 1_000
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_broadcast_chunk_size() -> usize {
    DEFAULT_BROADCAST_CHUNK_SIZE
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Colour human-readable output.
    #[serde(default = "default_true")]
    pub ansi: bool,

    /// Include source file and line.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi: true,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[metrics]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Record metrics and serve the Prometheus endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus endpoint address. Empty records without serving.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}

/// `[broadcast]` section, used by the `broadside` binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BroadcastSection {
    /// Seconds between server-time broadcasts. 0 disables them.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}
