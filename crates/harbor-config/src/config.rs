//! Main configuration types.
//!
//! This module provides the top-level [`HarborConfig`] struct.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use harbor_server::ServerConfig;
use harbor_telemetry::logging::create_env_filter;
use harbor_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};

use crate::{ConfigError, LifecycleSection, LoggingSection, ServerSection, TelemetrySection};

/// Upper bound for every `*_secs` timeout (one day).
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Complete Harbor service configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and the
/// environment.
///
/// # Example
///
/// ```
/// use harbor_config::HarborConfig;
///
/// let config = HarborConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.lifecycle.stop_timeout_secs, 15);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct HarborConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerSection,

    /// Lifecycle configuration.
    #[serde(default)]
    pub lifecycle: LifecycleSection,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl HarborConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The server address is not `host:port` or `:port`
    /// - Any timeout is zero or longer than [`MAX_TIMEOUT_SECS`]
    /// - The log level or log format cannot be parsed
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bind_addr = self.server_config().bind_addr();
        if bind_addr.parse::<SocketAddr>().is_err() {
            let valid = matches!(
                bind_addr.rsplit_once(':'),
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok()
            );
            if !valid {
                return Err(ConfigError::invalid_value(
                    "server.http_addr",
                    format!("expected host:port, got '{}'", self.server.http_addr),
                ));
            }
        }

        let timeouts = [
            ("server.shutdown_timeout_secs", self.server.shutdown_timeout_secs),
            ("server.header_read_timeout_secs", self.server.header_read_timeout_secs),
            ("server.request_timeout_secs", self.server.request_timeout_secs),
            ("lifecycle.stop_timeout_secs", self.lifecycle.stop_timeout_secs),
        ];
        for (field, secs) in timeouts {
            if secs == 0 {
                return Err(ConfigError::invalid_value(field, "must be greater than zero"));
            }
            if secs > MAX_TIMEOUT_SECS {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("must be at most {MAX_TIMEOUT_SECS} seconds, got {secs}"),
                ));
            }
        }

        if self.telemetry.service_name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "telemetry.service_name",
                "must not be empty",
            ));
        }

        create_env_filter(&self.telemetry.logging.level).map_err(|e| {
            ConfigError::invalid_value("telemetry.logging.level", e.to_string())
        })?;

        self.log_format()?;

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Binds to localhost with pretty debug logging and short timeouts.
    #[must_use]
    pub fn development() -> Self {
        Self {
            server: ServerSection {
                http_addr: "127.0.0.1:8080".to_string(),
                shutdown_timeout_secs: 2,
                ..ServerSection::default()
            },
            lifecycle: LifecycleSection {
                stop_timeout_secs: 5,
            },
            telemetry: TelemetrySection {
                logging: LoggingSection {
                    level: "debug".to_string(),
                    format: "pretty".to_string(),
                    ..LoggingSection::default()
                },
                ..TelemetrySection::default()
            },
        }
    }

    /// Create a production configuration preset.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Builds the listener configuration.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::builder()
            .http_addr(self.server.http_addr.clone())
            .shutdown_timeout(Duration::from_secs(self.server.shutdown_timeout_secs))
            .header_read_timeout(Duration::from_secs(self.server.header_read_timeout_secs))
            .request_timeout(Duration::from_secs(self.server.request_timeout_secs))
            .build()
    }

    /// Returns the deadline shared by all lifecycle stop hooks.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.stop_timeout_secs)
    }

    /// Builds the telemetry configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown log format.
    pub fn telemetry_config(&self) -> Result<TelemetryConfig, ConfigError> {
        let logging = LogConfig {
            enabled: self.telemetry.logging.enabled,
            level: self.telemetry.logging.level.clone(),
            format: self.log_format()?,
            ..LogConfig::production()
        };
        let metrics = MetricsConfig {
            enabled: self.telemetry.metrics.enabled,
            ..MetricsConfig::default()
        };

        Ok(TelemetryConfig::builder()
            .service_name(&self.telemetry.service_name)
            .logging(logging)
            .metrics(metrics)
            .build())
    }

    fn log_format(&self) -> Result<LogFormat, ConfigError> {
        self.telemetry
            .logging
            .format
            .parse()
            .map_err(|e: harbor_telemetry::TelemetryError| {
                ConfigError::invalid_value("telemetry.logging.format", e.to_string())
            })
    }
}
