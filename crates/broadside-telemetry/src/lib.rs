//! Observability for Broadside.
//!
//! - **Logging**: structured `tracing` output, JSON or human-readable
//! - **Metrics**: Prometheus export of the `metrics` facade
//!
//! # Example
//!
//! ```rust,ignore
//! use broadside_telemetry::{init_telemetry, LogConfig, MetricsConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let metrics = MetricsConfig {
//!         enabled: true,
//!         addr: Some("127.0.0.1:9090".to_string()),
//!     };
//!     init_telemetry(&LogConfig::production(), &metrics).expect("telemetry");
//! }
//! ```

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns the first initialization error.
pub fn init_telemetry(logging: &LogConfig, metrics: &MetricsConfig) -> TelemetryResult<()> {
    init_logging(logging)?;
    init_metrics(metrics)
}
