//! The request-handler seam.
//!
//! The server does not route. Every request, once its body has been
//! collected, is handed to a single [`RequestHandler`] supplied by the
//! application. Greeting, metrics and probe endpoints all live behind that
//! trait.
//!
//! Any `Fn(HttpRequest) -> impl Future<Output = HttpResponse>` closure is a
//! handler:
//!
//! ```rust
//! use bytes::Bytes;
//! use harbor_server::handler::{json_response, HttpRequest, RequestHandler};
//! use http::StatusCode;
//!
//! let handler = |_req: HttpRequest| async {
//!     json_response(StatusCode::OK, &serde_json::json!({ "message": "hi" }))
//! };
//!
//! fn assert_handler(_: &impl RequestHandler) {}
//! assert_handler(&handler);
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

/// A request whose body has already been collected.
pub type HttpRequest = Request<Bytes>;

/// Type alias for HTTP response body.
pub type ResponseBody = Full<Bytes>;

/// Type alias for the HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// Boxed response future returned by handlers.
pub type BoxedResponse = Pin<Box<dyn Future<Output = HttpResponse> + Send>>;

/// Shared, type-erased request handler.
pub type SharedHandler = Arc<dyn RequestHandler>;

/// Route label attached to a response's extensions by the handler.
///
/// The server labels request metrics with it. Responses without one, and
/// responses the server produces itself, are labelled
/// [`UNMATCHED_ROUTE`]. Keep the set of labels bounded: use route
/// templates, never raw paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedRoute(pub &'static str);

/// Metrics label for requests no route claimed.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Capability to turn a request into a response.
///
/// Handlers are infallible at this level: application errors are expected
/// to be rendered into a response. Panics are contained by the server and
/// turned into `500 Internal Server Error`.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handles a single request.
    fn handle(&self, request: HttpRequest) -> BoxedResponse;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    fn handle(&self, request: HttpRequest) -> BoxedResponse {
        Box::pin(self(request))
    }
}

/// Invokes a handler, converting any panic into a 500 response.
///
/// Both the synchronous call to [`RequestHandler::handle`] and the
/// returned future are guarded.
pub(crate) async fn dispatch(handler: &dyn RequestHandler, request: HttpRequest) -> HttpResponse {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
        Ok(future) => future,
        Err(payload) => return panic_response(&method, &path, payload.as_ref()),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => panic_response(&method, &path, payload.as_ref()),
    }
}

fn panic_response(method: &http::Method, path: &str, payload: &(dyn Any + Send)) -> HttpResponse {
    tracing::error!(
        http.method = %method,
        http.path = %path,
        panic = %panic_message(payload),
        "Request handler panicked"
    );
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "Internal server error",
    )
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builds a JSON response from any serializable value.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Builds a standard JSON error envelope.
///
/// ```json
/// {"error": {"code": "NOT_FOUND", "message": "..."}}
/// ```
pub fn error_response(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    let body = serde_json::json!({
        "error": {
            "code": code,
            "message": message
        }
    });
    json_response(status, &body)
}

/// Builds a response with a status code and no body.
pub fn empty_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
