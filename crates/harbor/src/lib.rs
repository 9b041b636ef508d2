//! # Harbor
//!
//! A minimal HTTP service: a greeting endpoint, Prometheus metrics, and
//! liveness/readiness probes, behind a listener that only reports ready
//! once it is bound and stops reporting ready before it drains.
//!
//! The binary wires everything explicitly:
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().with_env_prefix("HARBOR").load()?;
//! let metrics = harbor_telemetry::init_telemetry(&config.telemetry_config()?)?;
//!
//! let app = harbor::App::new(&config, metrics);
//! app.run(ShutdownSignal::with_os_signals()).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/harbor/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod routes;

pub use app::App;
pub use routes::DemoRouter;

/// Harbor version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
