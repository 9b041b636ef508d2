//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name (used in metrics and logs).
    pub service_name: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "harbor".to_string(),
            metrics: MetricsConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    metrics: Option<MetricsConfig>,
    logging: Option<LogConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Builds the configuration, copying the service name into each
    /// subsystem.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        let service_name = self.service_name.unwrap_or(defaults.service_name);

        let mut metrics = self.metrics.unwrap_or(defaults.metrics);
        metrics.service_name = service_name.clone();

        let mut logging = self.logging.unwrap_or(defaults.logging);
        logging.service_name = service_name.clone();

        TelemetryConfig {
            service_name,
            metrics,
            logging,
        }
    }
}
