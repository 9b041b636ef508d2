//! Observability for Harbor services.
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: Prometheus exposition via the `metrics` facade
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder().service_name("demo").build();
//! let registry = init_telemetry(&config)?;
//!
//! // Serve `registry.render()` on GET /metrics
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// Returns the registry that renders the metrics exposition.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<MetricsRegistry> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)
}
