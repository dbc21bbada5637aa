//! Top-level [`BroadsideConfig`].

use std::net::SocketAddr;
use std::time::Duration;

use broadside_server::ServerConfig;
use broadside_telemetry::logging::create_env_filter;
use broadside_telemetry::{LogConfig, LogFormat, MetricsConfig};
use serde::{Deserialize, Serialize};

use crate::{BroadcastSection, ConfigError, LoggingSection, MetricsSection, ServerSection};

/// Complete Broadside configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use broadside_config::BroadsideConfig;
///
/// let config = BroadsideConfig::default();
/// assert_eq!(config.server.port, 8080);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct BroadsideConfig {
    /// Listener and connection settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub metrics: MetricsSection,

    /// Periodic broadcast settings.
    #[serde(default)]
    pub broadcast: BroadcastSection,
}

impl BroadsideConfig {
    /// Development preset: debug level, human-readable output with locations.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.include_location = true;
        config
    }

    /// Production preset: JSON logs without colour, listening on all interfaces.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.server.host = "0.0.0.0".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi = false;
        config
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_config()
            .socket_addr()
            .map_err(|e| ConfigError::invalid_value("server.host", e.to_string()))?;

        let at_least_one = [
            ("server.max_queue_per_connection", self.server.max_queue_per_connection),
            ("server.max_message_size", self.server.max_message_size),
            ("server.broadcast_chunk_size", self.server.broadcast_chunk_size),
        ];
        for (field, value) in at_least_one {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be at least 1"));
            }
        }

        if self.server.handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "server.handshake_timeout_ms",
                "must be at least 1",
            ));
        }

        if self.logging.enabled {
            create_env_filter(&self.logging.level)
                .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        }

        if self.metrics.enabled
            && !self.metrics.addr.is_empty()
            && self.metrics.addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Builds the server configuration.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        let server = &self.server;
        ServerConfig::builder()
            .host(server.host.clone())
            .port(server.port)
            .max_queue_per_connection(server.max_queue_per_connection)
            .shutdown_grace(Duration::from_millis(server.shutdown_grace_ms))
            .handshake_timeout(Duration::from_millis(server.handshake_timeout_ms))
            .max_message_size(server.max_message_size)
            .broadcast_chunk_size(server.broadcast_chunk_size)
            .build()
    }

    /// Builds the logging configuration.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.logging.enabled,
            level: self.logging.level.clone(),
            format: self.logging.format,
            file_line_info: self.logging.include_location,
            ansi: self.logging.ansi,
            ..LogConfig::default()
        }
    }

    /// Builds the metrics configuration.
    #[must_use]
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.metrics.enabled,
            addr: Some(self.metrics.addr.clone()).filter(|addr| !addr.is_empty()),
        }
    }

    /// Interval between server-time broadcasts, or `None` when disabled.
    #[must_use]
    pub fn broadcast_interval(&self) -> Option<Duration> {
        match self.broadcast.interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
