//! Tracing subscriber setup

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Pick the filter directive: CLI flag, then `RUST_LOG`, then config, then default.
///
/// Blank values are skipped.
pub fn resolve_log_filter(cli: Option<&str>, env: Option<&str>, configured: Option<&str>) -> String {
    [cli, env, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|f| !f.is_empty())
        .unwrap_or(DEFAULT_LOG_FILTER)
        .to_string()
}

fn parse_env_filter_with_fallback(filter: &str) -> EnvFilter {
    EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!("Invalid log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'.");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init_logging(filter: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(parse_env_filter_with_fallback(filter))
        .with_target(false)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}
