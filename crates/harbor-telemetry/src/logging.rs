//! Structured logging for Harbor.
//!
//! Installs a `tracing-subscriber` registry with a single formatting layer,
//! either JSON (one object per line, for log shippers) or a pretty
//! human-readable layout for development.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//!
//! tracing::info!(http.method = "GET", http.path = "/", "Request completed");
//! ```

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Newline-delimited JSON
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(TelemetryError::InvalidConfig(format!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Pretty => f.write_str("pretty"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "harbor_server=debug,hyper=warn").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Service name, logged once at startup.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            span_events: true,
            file_line_info: true,
            thread_ids: false,
            include_target: true,
            service_name: "harbor".to_string(),
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
            service_name: "harbor".to_string(),
        }
    }
}

/// Initializes the global logging subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_thread_ids(config.thread_ids)
                .with_target(config.include_target)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_thread_ids(config.thread_ids)
                .with_target(config.include_target)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    tracing::info!(
        service.name = %config.service_name,
        format = %config.format,
        "Logging initialized"
    );
    Ok(())
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level '{filter}': {e}")))
}
