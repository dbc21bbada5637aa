//! Prometheus metrics.
//!
//! The server crates record through the `metrics` facade; until a recorder is
//! installed those calls are no-ops. [`init_metrics`] installs the Prometheus
//! recorder and, when an address is configured, serves the scrape endpoint.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `broadside_connections_active` | Gauge | Registered connections |
//! | `broadside_connections_total` | Counter | Connections ever registered |
//! | `broadside_handshake_failures_total` | Counter | Failed or timed-out handshakes |
//! | `broadside_evictions_total` | Counter | Connections evicted by a send |
//! | `broadside_broadcasts_total` | Counter | Broadcast calls |
//! | `broadside_broadcast_sent_total` | Counter | Successful per-connection deliveries |
//! | `broadside_broadcast_failed_total` | Counter | Failed per-connection deliveries |
//! | `broadside_messages_received_total` | Counter | Inbound data messages |

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Metric names.
pub mod names {
    /// Registered connections.
    pub const CONNECTIONS_ACTIVE: &str = "broadside_connections_active";
    /// Connections ever registered.
    pub const CONNECTIONS_TOTAL: &str = "broadside_connections_total";
    /// Failed or timed-out handshakes.
    pub const HANDSHAKE_FAILURES_TOTAL: &str = "broadside_handshake_failures_total";
    /// Connections evicted by a broadcast or direct send.
    pub const EVICTIONS_TOTAL: &str = "broadside_evictions_total";
    /// Broadcast calls.
    pub const BROADCASTS_TOTAL: &str = "broadside_broadcasts_total";
    /// Successful per-connection deliveries.
    pub const BROADCAST_SENT_TOTAL: &str = "broadside_broadcast_sent_total";
    /// Failed per-connection deliveries.
    pub const BROADCAST_FAILED_TOTAL: &str = "broadside_broadcast_failed_total";
    /// Inbound data messages.
    pub const MESSAGES_RECEIVED_TOTAL: &str = "broadside_messages_received_total";
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Address to serve the Prometheus endpoint on. Without one, metrics are
    /// still recorded and available through [`render_metrics`].
    pub addr: Option<String>,
}

/// Installs the global Prometheus recorder.
///
/// Must be called from within a Tokio runtime when an address is set.
///
/// # Errors
///
/// - `TelemetryError::InvalidAddress` if the address cannot be parsed
/// - `TelemetryError::MetricsInit` if a recorder is already installed or the
///   exporter cannot be built
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = match &config.addr {
        Some(addr) => {
            let addr = parse_addr(addr)?;
            let (recorder, exporter) = PrometheusBuilder::new()
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();

            metrics::set_global_recorder(recorder).map_err(|_| {
                TelemetryError::MetricsInit("a metrics recorder is already installed".to_string())
            })?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    error!(error = ?e, "Prometheus exporter stopped");
                }
            });
            info!(addr = %addr, "Serving Prometheus metrics");
            handle
        }
        None => PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();
    Ok(())
}

/// Renders the current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn parse_addr(addr: &str) -> TelemetryResult<SocketAddr> {
    addr.parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))
}

fn register_metric_descriptions() {
    describe_gauge!(names::CONNECTIONS_ACTIVE, "Number of registered WebSocket connections");
    describe_counter!(names::CONNECTIONS_TOTAL, "Total WebSocket connections registered");
    describe_counter!(
        names::HANDSHAKE_FAILURES_TOTAL,
        "Total WebSocket handshakes that failed or timed out"
    );
    describe_counter!(
        names::EVICTIONS_TOTAL,
        "Total connections evicted because they could not accept a message"
    );
    describe_counter!(names::BROADCASTS_TOTAL, "Total broadcast calls");
    describe_counter!(
        names::BROADCAST_SENT_TOTAL,
        "Total messages enqueued to connections by broadcasts"
    );
    describe_counter!(
        names::BROADCAST_FAILED_TOTAL,
        "Total broadcast deliveries that failed and evicted the connection"
    );
    describe_counter!(
        names::MESSAGES_RECEIVED_TOTAL,
        "Total text and binary messages received from clients"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
        assert!(render_metrics().is_none());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: Some("not-an-address".to_string()),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            names::CONNECTIONS_ACTIVE,
            names::CONNECTIONS_TOTAL,
            names::HANDSHAKE_FAILURES_TOTAL,
            names::EVICTIONS_TOTAL,
            names::BROADCASTS_TOTAL,
            names::BROADCAST_SENT_TOTAL,
            names::BROADCAST_FAILED_TOTAL,
            names::MESSAGES_RECEIVED_TOTAL,
        ] {
            assert!(name.starts_with("broadside_"));
        }
    }
}
