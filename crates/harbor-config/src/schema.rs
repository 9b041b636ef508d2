//! Configuration schema types.
//!
//! Every section fills missing fields with defaults and rejects unknown
//! ones.

use serde::{Deserialize, Serialize};

use harbor_server::{
    DEFAULT_HEADER_READ_TIMEOUT_SECS, DEFAULT_HTTP_ADDR, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};

/// Default lifecycle stop deadline in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 15;

/// HTTP server section.
///
/// # Example
///
/// ```
/// use harbor_config::ServerSection;
///
/// let section = ServerSection {
///     http_addr: ":8080".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(section.shutdown_timeout_secs, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address (`host:port`, or `:port` for every interface).
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful drain timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Request header read timeout in seconds.
    #[serde(default = "default_header_read_timeout")]
    pub header_read_timeout_secs: u64,

    /// Body collection and handler timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            header_read_timeout_secs: default_header_read_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_http_addr() -> String {
    DEFAULT_HTTP_ADDR.to_string()
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_header_read_timeout() -> u64 {
    DEFAULT_HEADER_READ_TIMEOUT_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Lifecycle section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LifecycleSection {
    /// Deadline shared by all stop hooks, in seconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

fn default_stop_timeout() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name reported in logs, metrics and the liveness probe.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            metrics: MetricsSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

fn default_service_name() -> String {
    "harbor".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Install a logging subscriber.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `harbor_server=debug,info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}
