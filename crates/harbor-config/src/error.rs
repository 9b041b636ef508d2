//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The `.env` file exists but could not be loaded.
    #[error("failed to load .env file: {0}")]
    DotenvError(#[from] dotenvy::Error),

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field with the invalid value.
        field: String,
        /// Explanation of why the value is invalid.
        reason: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Explanation of the parsing error.
        reason: String,
    },

    /// Validation error after loading.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Create a new file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a new read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create a new invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Create a new validation error.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::file_not_found("/etc/harbor.toml");
        assert_eq!(err.to_string(), "configuration file not found: /etc/harbor.toml");

        let err = ConfigError::invalid_value("server.http_addr", "missing port");
        assert_eq!(
            err.to_string(),
            "invalid configuration value for server.http_addr: missing port"
        );

        let err = ConfigError::env_parse_error("HARBOR__SERVER__SHUTDOWN_TIMEOUT_SECS", "expected integer");
        assert!(err.to_string().contains("HARBOR__SERVER__SHUTDOWN_TIMEOUT_SECS"));
    }

    #[test]
    fn test_read_error_has_source() {
        let err = ConfigError::read_error(
            "harbor.toml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
