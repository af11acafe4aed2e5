//! Tracing subscriber setup for hosts that do not install their own.

use tracing_subscriber::EnvFilter;

use crate::config::EnvConfig;
use crate::error::LoggingError;

/// Installs a global fmt subscriber filtered by the configured directive.
///
/// Returns `Ok(false)` when a global subscriber is already installed.
pub fn init_logging(config: &EnvConfig) -> Result<bool, LoggingError> {
    let filter = build_filter(config.effective_log_filter())?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();
    Ok(installed)
}

fn build_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|error| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        message: error.to_string(),
    })
}
