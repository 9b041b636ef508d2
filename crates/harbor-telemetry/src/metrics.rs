//! Prometheus metrics for Harbor.
//!
//! The recorder is installed globally without an HTTP listener of its own;
//! the service exposes [`MetricsRegistry::render`] on its main port.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `harbor_http_requests_total` | Counter | `method`, `path`, `status` | Total requests |
//! | `harbor_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//! | `harbor_http_in_flight_requests` | Gauge | - | In-flight requests |
//! | `harbor_ready` | Gauge | - | 1 while the service accepts traffic |
//!
//! Recording functions are no-ops until a recorder is installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_telemetry::metrics::{init_metrics, record_request, MetricsConfig};
//!
//! let registry = init_metrics(&MetricsConfig::default())?;
//! record_request("GET", "/", 200, Duration::from_millis(3));
//! println!("{}", registry.render());
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Request counter name.
pub const REQUESTS_TOTAL: &str = "harbor_http_requests_total";

/// Request duration histogram name.
pub const REQUEST_DURATION_SECONDS: &str = "harbor_http_request_duration_seconds";

/// In-flight request gauge name.
pub const IN_FLIGHT_REQUESTS: &str = "harbor_http_in_flight_requests";

/// Readiness gauge name.
pub const READY: &str = "harbor_ready";

/// Handle of the globally installed recorder.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Added to every metric as the `service` label.
    pub service_name: String,

    /// Histogram buckets for request duration.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "harbor".to_string(),
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Renders the Prometheus text exposition.
///
/// Cheap to clone; all clones render the same recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Creates a registry around an existing handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Creates a registry backed by a recorder that is not installed
    /// globally. It always renders an empty exposition.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(PrometheusBuilder::new().build_recorder().handle())
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the global Prometheus recorder.
///
/// Only the first successful call installs a recorder; later calls return a
/// registry for the one already installed. When metrics are disabled a
/// detached registry is returned and nothing is recorded.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are invalid or
/// another recorder was installed outside this crate.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::detached());
    }

    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(MetricsRegistry::new(handle.clone()));
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = METRICS_HANDLE.get_or_init(|| handle).clone();
    register_metric_descriptions();

    Ok(MetricsRegistry::new(handle))
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_gauge!(
        IN_FLIGHT_REQUESTS,
        "Number of HTTP requests currently being processed"
    );
    describe_gauge!(READY, "Whether the service is accepting traffic (1) or not (0)");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records a completed request.
///
/// Updates `harbor_http_requests_total` and
/// `harbor_http_request_duration_seconds`.
pub fn record_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

fn increment_in_flight() {
    gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
}

fn decrement_in_flight() {
    gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
}

/// Sets the readiness gauge.
pub fn set_ready(ready: bool) {
    gauge!(READY).set(if ready { 1.0 } else { 0.0 });
}

/// Counts one request in `harbor_http_in_flight_requests` while alive.
///
/// Keeps the gauge balanced even when the request future panics or is
/// dropped by a forced shutdown.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight counter.
    #[must_use]
    pub fn new() -> Self {
        increment_in_flight();
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        decrement_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.service_name, "harbor");
        assert!(config.duration_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_record_functions_dont_panic_without_recorder() {
        record_request("GET", "/", 200, Duration::from_millis(10));
        set_ready(true);
        let guard = InFlightGuard::new();
        drop(guard);
    }

    #[test]
    fn test_disabled_metrics_are_detached() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = init_metrics(&config).unwrap();
        assert!(!registry.render().contains(REQUESTS_TOTAL));
    }

    #[test]
    fn test_init_is_reentrant_and_renders_recorded_metrics() {
        let first = init_metrics(&MetricsConfig::default()).unwrap();
        let second = init_metrics(&MetricsConfig::default()).unwrap();

        record_request("GET", "/metrics-test", 200, Duration::from_millis(5));
        set_ready(true);

        for registry in [&first, &second] {
            let output = registry.render();
            assert!(output.contains(REQUESTS_TOTAL));
            assert!(output.contains("path=\"/metrics-test\""));
            assert!(output.contains(READY));
        }
        assert!(METRICS_HANDLE.get().is_some());
    }

    #[test]
    fn test_empty_buckets_rejected() {
        // Bucket validation happens before the recorder is touched.
        let result = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION_SECONDS.to_string()), &[]);
        assert!(result.is_err());
    }
}
