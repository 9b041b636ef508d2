//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, `.env` and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, HarborConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "HARBOR";

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. `.env` file, loaded into the process environment
/// 4. Environment variables
///
/// # Example
///
/// ```no_run
/// use harbor_config::ConfigLoader;
///
/// # fn main() -> Result<(), harbor_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("harbor.toml")?
///     .with_dotenv()?
///     .with_env_prefix("HARBOR")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: HarborConfig,
    env_prefix: Option<String>,
    env_vars: Option<Vec<(String, String)>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HarborConfig::default(),
            env_prefix: None,
            env_vars: None,
        }
    }

    /// Start with development preset configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use harbor_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = HarborConfig::development();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension: `.toml` or `.json`. Missing
    /// fields take their default values; unknown fields are rejected.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read,
    /// has an unsupported extension or fails to parse.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        self.config = Self::parse_file(&content, path)?;

        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is not `toml`
    /// or `json`.
    ///
    /// # Example
    ///
    /// ```
    /// use harbor_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     http_addr = "127.0.0.1:3000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Load a `.env` file from the current directory (or a parent) into
    /// the process environment. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DotenvError` if the file exists but is
    /// malformed or unreadable.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, e.g.
    /// `HARBOR__SERVER__HTTP_ADDR=:9000` or
    /// `HARBOR__TELEMETRY__LOGGING__LEVEL=debug`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Read overrides from these pairs instead of the process environment.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<HarborConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars = self
                .env_vars
                .take()
                .unwrap_or_else(|| env::vars().collect());
            self.apply_env_overrides(&prefix, vars)?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> HarborConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<HarborConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(
        &mut self,
        prefix: &str,
        vars: Vec<(String, String)>,
    ) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        for (key, value) in vars {
            if let Some(path) = key.strip_prefix(&marker) {
                self.apply_env_var(&key, path, &value)?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, path: &str, value: &str) -> Result<(), ConfigError> {
        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Server section
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_secs(key, value)?;
            }
            ["SERVER", "HEADER_READ_TIMEOUT_SECS"] => {
                config.server.header_read_timeout_secs = parse_secs(key, value)?;
            }
            ["SERVER", "REQUEST_TIMEOUT_SECS"] => {
                config.server.request_timeout_secs = parse_secs(key, value)?;
            }
            // Lifecycle section
            ["LIFECYCLE", "STOP_TIMEOUT_SECS"] => {
                config.lifecycle.stop_timeout_secs = parse_secs(key, value)?;
            }
            // Telemetry section
            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = value.to_lowercase();
            }
            // Unknown key, ignored
            _ => {}
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected a whole number of seconds"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, HarborConfig::default());
    }

    #[test]
    fn test_toml_file() {
        let file = write_file(
            ".toml",
            r#"
                [server]
                http_addr = ":9090"
                shutdown_timeout_secs = 4

                [lifecycle]
                stop_timeout_secs = 8

                [telemetry.logging]
                format = "pretty"
            "#,
        );

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.http_addr, ":9090");
        assert_eq!(config.server.shutdown_timeout_secs, 4);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.lifecycle.stop_timeout_secs, 8);
        assert_eq!(config.telemetry.logging.format, "pretty");
        assert_eq!(config.telemetry.logging.level, "info");
    }

    #[test]
    fn test_json_file() {
        let file = write_file(
            ".json",
            r#"{"server": {"http_addr": "127.0.0.1:7000"}, "telemetry": {"service_name": "demo"}}"#,
        );

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:7000");
        assert_eq!(config.telemetry.service_name, "demo");
    }

    #[test]
    fn test_unknown_field_in_file_rejected() {
        let file = write_file(".toml", "[server]\nmax_connections = 10\n");
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_file(".yaml", "server: {}\n");
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new()
            .with_file("/definitely/not/here/harbor.toml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));

        assert!(ConfigLoader::new()
            .with_optional_file("/definitely/not/here/harbor.toml")
            .is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_file(".toml", "[server]\nhttp_addr = \":9090\"\n");

        let config = ConfigLoader::new()
            .with_file(file.path())
            .unwrap()
            .with_env_prefix("harbor")
            .with_env_vars([
                ("HARBOR__SERVER__HTTP_ADDR", "127.0.0.1:1234"),
                ("HARBOR__SERVER__SHUTDOWN_TIMEOUT_SECS", "3"),
                ("HARBOR__LIFECYCLE__STOP_TIMEOUT_SECS", "6"),
                ("HARBOR__TELEMETRY__METRICS__ENABLED", "off"),
                ("HARBOR__TELEMETRY__LOGGING__FORMAT", "PRETTY"),
                ("HARBOR__UNKNOWN__KEY", "ignored"),
                ("OTHER__SERVER__HTTP_ADDR", "ignored:1"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:1234");
        assert_eq!(config.server.shutdown_timeout_secs, 3);
        assert_eq!(config.lifecycle.stop_timeout_secs, 6);
        assert!(!config.telemetry.metrics.enabled);
        assert_eq!(config.telemetry.logging.format, "pretty");
    }

    #[test]
    fn test_env_parse_errors() {
        let err = ConfigLoader::new()
            .with_env_prefix("HARBOR")
            .with_env_vars([("HARBOR__SERVER__REQUEST_TIMEOUT_SECS", "soon")])
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));

        let err = ConfigLoader::new()
            .with_env_prefix("HARBOR")
            .with_env_vars([("HARBOR__TELEMETRY__LOGGING__ENABLED", "maybe")])
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));
    }

    #[test]
    fn test_env_values_are_validated() {
        let err = ConfigLoader::new()
            .with_env_prefix("HARBOR")
            .with_env_vars([("HARBOR__SERVER__HTTP_ADDR", "nowhere")])
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_env_timeout_beyond_limit_rejected() {
        let err = ConfigLoader::new()
            .with_env_prefix("HARBOR")
            .with_env_vars([
                ("HARBOR__SERVER__HTTP_ADDR", "127.0.0.1:0"),
                ("HARBOR__LIFECYCLE__STOP_TIMEOUT_SECS", "18446744073709551615"),
            ])
            .load()
            .unwrap_err();
        assert!(
            matches!(&err, ConfigError::InvalidValue { field, .. } if field == "lifecycle.stop_timeout_secs"),
            "{err}"
        );
    }

    #[test]
    fn test_with_string_formats() {
        let config = ConfigLoader::new()
            .with_string(r#"{"lifecycle": {"stop_timeout_secs": 2}}"#, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.lifecycle.stop_timeout_secs, 2);

        assert!(ConfigLoader::new().with_string("", "ini").is_err());
    }

    #[test]
    fn test_load_unvalidated_skips_validation() {
        let config = ConfigLoader::new()
            .with_string("[server]\nhttp_addr = \"bogus\"", "toml")
            .unwrap()
            .load_unvalidated();
        assert_eq!(config.server.http_addr, "bogus");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("perhaps"), None);
    }
}
