//! # Harbor Server
//!
//! Listener lifecycle and readiness gating for Harbor services.
//!
//! This crate provides:
//!
//! - A lock-free [`ReadinessFlag`] shared by the listener and the probes
//! - A [`ServerHandle`] that binds before it reports ready and drains
//!   connections within a deadline on stop
//! - A [`ProcessLifecycle`] that runs start hooks forward and stop hooks in
//!   reverse under one shared deadline
//! - The [`RequestHandler`] seam, with handler panics turned into `500`s
//! - Liveness and readiness probe responses
//!
//! Routing is not part of this crate. The application supplies a single
//! request handler and decides which paths serve what.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use harbor_server::{ProcessLifecycle, ReadinessFlag, ServerConfig, ServerHandle, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let readiness = ReadinessFlag::new();
//!     let server = Arc::new(ServerHandle::new(ServerConfig::default(), handler, readiness.clone()));
//!
//!     let lifecycle = ProcessLifecycle::with_readiness(readiness)
//!         .with_hook(server.lifecycle_hook());
//!
//!     lifecycle.run(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/harbor-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
pub mod handler;
mod health;
mod lifecycle;
mod readiness;
mod server;
mod shutdown;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_HEADER_READ_TIMEOUT_SECS, DEFAULT_HTTP_ADDR,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use error::{ServerError, ServerResult};
pub use handler::{
    HttpRequest, HttpResponse, MatchedRoute, RequestHandler, SharedHandler, UNMATCHED_ROUTE,
};
pub use health::{
    liveness_response, readiness_response, HealthCheck, HealthStatus, ReadinessStatus,
};
pub use lifecycle::{
    BoxError, Hook, HookFailure, HookFailures, HookResult, LifecycleError, LifecycleResult,
    LifecycleState, ProcessLifecycle, StopContext, DEFAULT_STOP_TIMEOUT,
};
pub use readiness::ReadinessFlag;
pub use server::{FatalHandler, ServerHandle};
pub use shutdown::{InFlightToken, InFlightTracker, ShutdownSignal};
