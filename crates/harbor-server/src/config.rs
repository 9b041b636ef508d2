//! Server configuration types.
//!
//! # Example
//!
//! ```rust
//! use harbor_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("127.0.0.1:0")
//!     .shutdown_timeout(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(config.http_addr(), "127.0.0.1:0");
//! ```

use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default graceful drain timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Default timeout for reading request headers, in seconds.
pub const DEFAULT_HEADER_READ_TIMEOUT_SECS: u64 = 5;

/// Default timeout for body collection and handler execution, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    http_addr: String,

    /// How long a stopping server waits for in-flight requests
    shutdown_timeout: Duration,

    /// Deadline for a client to finish sending request headers
    header_read_timeout: Duration,

    /// Deadline for body collection and, separately, handler execution
    request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Returns the address handed to the socket layer.
    ///
    /// A host-less address such as `":8080"` binds every interface through
    /// the IPv6 wildcard `[::]`, which also accepts IPv4 clients on
    /// dual-stack hosts.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.http_addr.starts_with(':') {
            format!("[::]{}", self.http_addr)
        } else {
            self.http_addr.clone()
        }
    }

    /// Returns the IPv4 wildcard to bind when the IPv6 wildcard is
    /// unavailable. Only host-less addresses have one.
    #[must_use]
    pub fn fallback_bind_addr(&self) -> Option<String> {
        self.http_addr
            .starts_with(':')
            .then(|| format!("0.0.0.0{}", self.http_addr))
    }

    /// Returns the graceful drain timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the request header read timeout.
    #[must_use]
    pub fn header_read_timeout(&self) -> Duration {
        self.header_read_timeout
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    shutdown_timeout: Duration,
    header_read_timeout: Duration,
    request_timeout: Duration,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            header_read_timeout: Duration::from_secs(DEFAULT_HEADER_READ_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Sets the bind address. Use port `0` for an ephemeral port.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the graceful drain timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the request header read timeout.
    #[must_use]
    pub fn header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds the [`ServerConfig`].
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            header_read_timeout: self.header_read_timeout,
            request_timeout: self.request_timeout,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.http_addr(), DEFAULT_HTTP_ADDR);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.header_read_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_builder_chaining() {
        let config = ServerConfig::builder()
            .http_addr("127.0.0.1:9090")
            .shutdown_timeout(Duration::from_secs(3))
            .header_read_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(2))
            .build();

        assert_eq!(config.http_addr(), "127.0.0.1:9090");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));
        assert_eq!(config.header_read_timeout(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_bind_addr_passthrough() {
        let config = ServerConfig::builder().http_addr("127.0.0.1:8080").build();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");

        let config = ServerConfig::builder().http_addr("localhost:3000").build();
        assert_eq!(config.bind_addr(), "localhost:3000");
    }

    #[test]
    fn test_bind_addr_port_only() {
        let config = ServerConfig::builder().http_addr(":8080").build();
        assert_eq!(config.bind_addr(), "[::]:8080");
        assert_eq!(config.fallback_bind_addr().as_deref(), Some("0.0.0.0:8080"));
    }

    #[test]
    fn test_explicit_host_has_no_fallback() {
        let config = ServerConfig::builder().http_addr("0.0.0.0:8080").build();
        assert_eq!(config.fallback_bind_addr(), None);
    }
}
