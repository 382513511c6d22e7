//! Process-wide log setup.

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("A global logger is already installed")]
    AlreadyInitialised,

    /// The subscriber is installed but `log` records cannot reach it.
    #[error("Failed to route log records into tracing: {0}")]
    LogBridge(String),
}

/// `RUST_LOG` when set, otherwise the configured level.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives),
        _ => parse_filter(&config.level),
    }
}

fn parse_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter {
        filter: directives.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber and routes `log` records into it.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config)?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(registry.with(fmt::layer().json())),
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
    };
    installed.map_err(|_| LoggingError::AlreadyInitialised)?;

    tracing_log::LogTracer::init().map_err(|e| LoggingError::LogBridge(e.to_string()))?;

    tracing::debug!(format = ?config.format, "Logging initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            format: LogFormat::Json,
        }
    }

    #[test]
    #[serial]
    fn test_filter_falls_back_to_configured_level() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        let filter = build_env_filter(&config("warn")).unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    #[serial]
    fn test_rust_log_takes_precedence() {
        std::env::set_var(EnvFilter::DEFAULT_ENV, "extract_pipeline=trace");
        let filter = build_env_filter(&config("warn")).unwrap();
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        assert_eq!(filter.to_string(), "extract_pipeline=trace");
    }

    #[test]
    #[serial]
    fn test_invalid_filter() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        assert!(matches!(
            build_env_filter(&config("extract_pipeline=notalevel")),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_second_init_fails() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        let first = init_logging(&config("info"));
        let second = init_logging(&config("info"));
        // Another test binary may already own the global logger.
        assert!(first.is_ok() || matches!(first, Err(LoggingError::AlreadyInitialised)));
        assert!(matches!(second, Err(LoggingError::AlreadyInitialised)));
    }
}
