//! Liveness and readiness probes.
//!
//! The routing layer owns the URLs; this module owns the answers:
//!
//! - Liveness: always `200 OK` while the process is running
//! - Readiness: `200 OK` while the [`ReadinessFlag`] is raised,
//!   `503 Service Unavailable` otherwise
//!
//! # Example
//!
//! ```rust
//! use harbor_server::{readiness_response, HealthCheck};
//! use harbor_server::ReadinessFlag;
//! use http::StatusCode;
//!
//! let health = HealthCheck::new("my-service", "1.0.0");
//! assert!(health.status().is_healthy());
//!
//! let readiness = ReadinessFlag::new();
//! assert_eq!(readiness_response(&readiness).status(), StatusCode::SERVICE_UNAVAILABLE);
//!
//! readiness.set(true);
//! assert_eq!(readiness_response(&readiness).status(), StatusCode::OK);
//! ```

use std::time::{Duration, Instant};

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::handler::{json_response, HttpResponse};
use crate::readiness::ReadinessFlag;

/// Liveness status body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Always "healthy" while the process can answer
    status: String,

    /// Service name
    service: String,

    /// Service version
    version: String,

    /// Process uptime in seconds
    uptime_seconds: u64,
}

impl HealthStatus {
    /// Creates a healthy status.
    #[must_use]
    pub fn healthy(service: impl Into<String>, version: impl Into<String>, uptime: Duration) -> Self {
        Self {
            status: "healthy".to_string(),
            service: service.into(),
            version: version.into(),
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Returns the status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }

    /// Returns whether the status is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Liveness probe source.
///
/// Liveness does not consult readiness: a process that is draining is
/// still alive and must not be restarted by the orchestrator.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    start_time: Instant,
}

impl HealthCheck {
    /// Creates a new health check, recording the current instant as the
    /// process start time.
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            start_time: Instant::now(),
        }
    }

    /// Returns the current liveness status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus::healthy(&self.service, &self.version, self.uptime())
    }

    /// Returns the time since this check was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Readiness status body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessStatus {
    ready: bool,
}

impl ReadinessStatus {
    /// Captures the current value of a readiness flag.
    #[must_use]
    pub fn from_flag(flag: &ReadinessFlag) -> Self {
        Self { ready: flag.get() }
    }

    /// Returns whether the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns the probe status code for this readiness state.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Builds the liveness probe response.
#[must_use]
pub fn liveness_response(health: &HealthCheck) -> HttpResponse {
    json_response(StatusCode::OK, &health.status())
}

/// Builds the readiness probe response.
///
/// The flag is read exactly once so the status code and body agree.
#[must_use]
pub fn readiness_response(readiness: &ReadinessFlag) -> HttpResponse {
    let status = ReadinessStatus::from_flag(readiness);
    json_response(status.status_code(), &status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_health_status_healthy() {
        let status = HealthStatus::healthy("test", "1.0.0", Duration::from_secs(60));

        assert!(status.is_healthy());
        assert_eq!(status.status(), "healthy");
        assert_eq!(status.service(), "test");
        assert_eq!(status.version(), "1.0.0");
        assert_eq!(status.uptime_seconds(), 60);
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus::healthy("api", "2.0.0", Duration::from_secs(3600));
        let json = serde_json::to_string(&status).unwrap();

        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"service\":\"api\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
    }

    #[test]
    fn test_health_check_uptime() {
        let health = HealthCheck::new("test", "1.0.0");
        std::thread::sleep(Duration::from_millis(10));

        assert!(health.uptime() >= Duration::from_millis(10));
        assert_eq!(health.service(), "test");
        assert_eq!(health.version(), "1.0.0");
    }

    #[tokio::test]
    async fn test_liveness_ignores_readiness() {
        let health = HealthCheck::new("svc", "0.1.0");
        let response = liveness_response(&health);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(body_string(response).await.contains("\"healthy\""));
    }

    #[tokio::test]
    async fn test_readiness_response_tracks_flag() {
        let readiness = ReadinessFlag::new();

        let response = readiness_response(&readiness);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, r#"{"ready":false}"#);

        readiness.set(true);
        let response = readiness_response(&readiness);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"ready":true}"#);
    }

    #[test]
    fn test_readiness_status_code() {
        let flag = ReadinessFlag::new();
        assert_eq!(
            ReadinessStatus::from_flag(&flag).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        flag.set(true);
        let status = ReadinessStatus::from_flag(&flag);
        assert!(status.is_ready());
        assert_eq!(status.status_code(), StatusCode::OK);
    }
}
