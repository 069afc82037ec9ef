//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Hosts embedding the driver
//! normally install their own subscriber; this module is for the bundled
//! simulator and for hosts that want the default output.
//!
//! `RUST_LOG` takes precedence over the configured level when set:
//!
//! ```text
//! RUST_LOG=daq_device_gate=trace gate-sim --callers 50
//! ```

use crate::config::DriverConfig;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Build from the `[logging]` section of the driver configuration.
    pub fn from_driver_config(config: &DriverConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.logging.level)?,
            format: parse_format(&config.logging.format)?,
            ..Default::default()
        })
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the driver configuration.
pub fn init_from_config(config: &DriverConfig) -> Result<(), String> {
    init(TracingConfig::from_driver_config(config)?)
}

/// Install a global subscriber.
///
/// Idempotent: if a global dispatcher is already set this returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let fmt_layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {e}"))
            }
        })
}

/// Parse a log level name.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(format!("Invalid log level: {other}")),
    }
}

/// Parse an output format name.
pub fn parse_format(format: &str) -> Result<OutputFormat, String> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        other => Err(format!("Invalid log format: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG"), Ok(Level::DEBUG));
        assert_eq!(parse_log_level("warn"), Ok(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_from_driver_config() {
        let mut config = DriverConfig::default();
        config.logging.level = "debug".into();
        config.logging.format = "json".into();

        let tracing_config = TracingConfig::from_driver_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Json);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TracingConfig::default().with_ansi(false);
        assert!(init(config.clone()).is_ok());
        assert!(init(config.with_format(OutputFormat::Compact)).is_ok());
    }
}
