//! Configuration management for querywatch.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QueryWatchError, Result};

/// Prefix for environment variable overrides, e.g.
/// `QUERYWATCH__DIAGNOSTICS__MAX_QUERY_COUNT=25`.
const ENV_PREFIX: &str = "QUERYWATCH";

/// Main configuration for querywatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryWatchConfig {
    /// Query diagnostic thresholds and dump limits
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query diagnostic configuration.
///
/// Read-only after startup. The three budgets and the throw flag seed every
/// new request scope, which may then override them for that request only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Number of queries in one request that triggers a dump
    #[serde(default = "default_max_query_count")]
    pub max_query_count: u64,

    /// Longest a single query may take, in seconds
    #[serde(default = "default_max_single_query_seconds")]
    pub max_single_query_seconds: f64,

    /// Longest all queries of one request may take together, in seconds
    #[serde(default = "default_max_total_query_seconds")]
    pub max_total_query_seconds: f64,

    /// Stack dumps emitted per request before going quiet
    #[serde(default = "default_max_request_dumps")]
    pub max_request_dumps: u64,

    /// Stack dumps emitted per wall-clock second across all requests
    #[serde(default = "default_max_global_dumps_per_second")]
    pub max_global_dumps_per_second: u64,

    /// Fail the request instead of logging when a threshold is violated
    #[serde(default)]
    pub throw_on_violation: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_query_count: default_max_query_count(),
            max_single_query_seconds: default_max_single_query_seconds(),
            max_total_query_seconds: default_max_total_query_seconds(),
            max_request_dumps: default_max_request_dumps(),
            max_global_dumps_per_second: default_max_global_dumps_per_second(),
            throw_on_violation: false,
        }
    }
}

fn default_max_query_count() -> u64 {
    10
}

fn default_max_single_query_seconds() -> f64 {
    0.2
}

fn default_max_total_query_seconds() -> f64 {
    0.4
}

fn default_max_request_dumps() -> u64 {
    3
}

fn default_max_global_dumps_per_second() -> u64 {
    20
}

impl DiagnosticsConfig {
    /// Check that the time budgets are usable.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_single_query_seconds", self.max_single_query_seconds),
            ("max_total_query_seconds", self.max_total_query_seconds),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(QueryWatchError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QueryWatchConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QueryWatchConfig = serde_yaml::from_str(yaml)
            .map_err(|e| QueryWatchError::Config(e.to_string()))?;
        config.diagnostics.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered with environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: QueryWatchConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.diagnostics.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_diagnostics() {
        let config = DiagnosticsConfig::default();
        assert_eq!(config.max_query_count, 10);
        assert_eq!(config.max_single_query_seconds, 0.2);
        assert_eq!(config.max_total_query_seconds, 0.4);
        assert_eq!(config.max_request_dumps, 3);
        assert_eq!(config.max_global_dumps_per_second, 20);
        assert!(!config.throw_on_violation);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
diagnostics:
  max_query_count: 3
  throw_on_violation: true
logging:
  format: json
"#;
        let config = QueryWatchConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.diagnostics.max_query_count, 3);
        assert!(config.diagnostics.throw_on_violation);
        // Unspecified keys keep their defaults
        assert_eq!(config.diagnostics.max_single_query_seconds, 0.2);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = QueryWatchConfig::from_yaml("{}").unwrap();
        assert_eq!(config.diagnostics, DiagnosticsConfig::default());
    }

    #[test]
    fn test_rejects_negative_budget() {
        let yaml = r#"
diagnostics:
  max_total_query_seconds: -1.0
"#;
        let err = QueryWatchConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, QueryWatchError::Config(_)));
    }

    #[test]
    fn test_rejects_nan_budget() {
        let config = DiagnosticsConfig {
            max_single_query_seconds: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_file() {
        let config = QueryWatchConfig::load(None).unwrap();
        assert_eq!(config.diagnostics.max_request_dumps, 3);
    }
}
