//! Driver configuration using Figment
//!
//! Configuration is loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `DEVICE_GATE_`
//! 2. TOML configuration file (default: `config/device_gate.toml`)
//! 3. Built-in defaults
//!
//! Nested keys are separated by a double underscore in environment variables:
//!
//! ```text
//! DEVICE_GATE_GATE__CONCURRENT_COMMAND_LIMIT=8
//! DEVICE_GATE_LOGGING__LEVEL=debug
//! DEVICE_GATE_LOGGING__FORMAT=json
//! ```
//!
//! # Example
//!
//! ```no_run
//! use daq_device_gate::config::DriverConfig;
//!
//! let config = DriverConfig::load_from("config/device_gate.toml")?;
//! println!("Limit: {}", config.gate.concurrent_command_limit);
//! # Ok::<(), daq_device_gate::config::ConfigError>(())
//! ```

use crate::gate::DEFAULT_CONCURRENT_COMMAND_LIMIT;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/device_gate.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "DEVICE_GATE_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment could not load or deserialize the sources.
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),
    /// Values loaded but are not acceptable.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    /// Address gate settings
    #[serde(default)]
    pub gate: GateConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Address gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Callers allowed to be pending on one address before rejection
    #[serde(default = "default_concurrent_command_limit")]
    pub concurrent_command_limit: usize,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_concurrent_command_limit() -> usize {
    DEFAULT_CONCURRENT_COMMAND_LIMIT.get()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            concurrent_command_limit: default_concurrent_command_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl GateConfig {
    /// The limit as a non-zero value, if valid.
    pub fn limit(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.concurrent_command_limit).ok_or_else(|| {
            ConfigError::Validation("concurrent_command_limit must be at least 1".to_string())
        })
    }
}

impl DriverConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - `concurrent_command_limit` is at least 1
    /// - log level is one of trace, debug, info, warn, error
    /// - log format is one of pretty, compact, json
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gate.limit()?;

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }

        if !VALID_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DriverConfig::default();
        assert_eq!(config.gate.concurrent_command_limit, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = DriverConfig::default();
        config.gate.concurrent_command_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut config = DriverConfig::default();
        config.logging.format = "xml".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log format 'xml'"));
    }
}
