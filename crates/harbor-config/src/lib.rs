//! Typed configuration for Harbor services.
//!
//! - TOML and JSON configuration files
//! - `.env` files and environment variable overrides
//! - Strict parsing (unknown fields are errors)
//! - Layered loading (defaults → file → env)
//!
//! # Example
//!
//! ```no_run
//! use harbor_config::ConfigLoader;
//!
//! # fn main() -> Result<(), harbor_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("harbor.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("HARBOR")
//!     .load()?;
//!
//! println!("Server will listen on: {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = ":8080"
//! shutdown_timeout_secs = 10
//! header_read_timeout_secs = 5
//! request_timeout_secs = 30
//!
//! [lifecycle]
//! stop_timeout_secs = 15
//!
//! [telemetry]
//! service_name = "harbor"
//!
//! [telemetry.metrics]
//! enabled = true
//!
//! [telemetry.logging]
//! enabled = true
//! level = "info"
//! format = "json"
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{HarborConfig, MAX_TIMEOUT_SECS};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    LifecycleSection, LoggingSection, MetricsSection, ServerSection, TelemetrySection,
    DEFAULT_STOP_TIMEOUT_SECS,
};
