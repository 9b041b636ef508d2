//! The demo request handler.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/` | `200 {"message":"Hello World!"}` |
//! | GET | `/metrics` | Prometheus text exposition |
//! | GET | `/healthz` | `200` with service status |
//! | GET | `/readyz` | `200` when ready, `503` otherwise |
//!
//! Anything else is a JSON `404`; a known path with another method is a
//! `405`.

use bytes::Bytes;
use http::{header, Method, Response, StatusCode};
use http_body_util::Full;

use harbor_server::handler::{error_response, json_response, BoxedResponse};
use harbor_server::{
    liveness_response, readiness_response, HealthCheck, HttpRequest, HttpResponse, MatchedRoute,
    ReadinessFlag, RequestHandler,
};
use harbor_telemetry::metrics::set_ready;
use harbor_telemetry::MetricsRegistry;

/// Content type of the Prometheus text format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Greeting,
    Metrics,
    Healthz,
    Readyz,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Self::Greeting),
            "/metrics" => Some(Self::Metrics),
            "/healthz" => Some(Self::Healthz),
            "/readyz" => Some(Self::Readyz),
            _ => None,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Greeting => "/",
            Self::Metrics => "/metrics",
            Self::Healthz => "/healthz",
            Self::Readyz => "/readyz",
        }
    }
}

/// Routes requests to the greeting, metrics and probe endpoints.
///
/// Responses to known paths carry a [`MatchedRoute`] extension so the
/// server labels request metrics by route rather than raw path.
#[derive(Debug, Clone)]
pub struct DemoRouter {
    readiness: ReadinessFlag,
    health: HealthCheck,
    metrics: MetricsRegistry,
}

impl DemoRouter {
    /// Creates a router that reports `readiness` on `/readyz`.
    #[must_use]
    pub fn new(readiness: ReadinessFlag, health: HealthCheck, metrics: MetricsRegistry) -> Self {
        Self {
            readiness,
            health,
            metrics,
        }
    }

    /// Produces the response for a request.
    #[must_use]
    pub fn route(&self, request: &HttpRequest) -> HttpResponse {
        let Some(route) = Route::from_path(request.uri().path()) else {
            return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found");
        };

        if request.method() != Method::GET {
            let mut response = error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "METHOD_NOT_ALLOWED",
                &format!("{} does not support {}", route.path(), request.method()),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET"));
            return response;
        }

        match route {
            Route::Greeting => json_response(
                StatusCode::OK,
                &serde_json::json!({ "message": "Hello World!" }),
            ),
            Route::Metrics => self.metrics_response(),
            Route::Healthz => liveness_response(&self.health),
            Route::Readyz => readiness_response(&self.readiness),
        }
    }

    fn metrics_response(&self) -> HttpResponse {
        set_ready(self.readiness.get());

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)
            .body(Full::new(Bytes::from(self.metrics.render())))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }
}

impl RequestHandler for DemoRouter {
    fn handle(&self, request: HttpRequest) -> BoxedResponse {
        let mut response = self.route(&request);

        if let Some(route) = Route::from_path(request.uri().path()) {
            response.extensions_mut().insert(MatchedRoute(route.path()));
        }

        Box::pin(std::future::ready(response))
    }
}
