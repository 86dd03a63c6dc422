//! Tracing subscriber setup for the `cubefit` binary.
//!
//! Filter precedence: `CUBEFIT_LOG`, then `RUST_LOG`, then the `--log-level`
//! flag. Logs go to stderr so reports on stdout stay pipeable.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::AppError;

pub const LOG_ENV: &str = "CUBEFIT_LOG";

pub fn build_filter(base_level: &str) -> Result<EnvFilter, AppError> {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(base_level))
        .map_err(|e| AppError::new(2, format!("Invalid log filter '{base_level}': {e}")))
}

pub fn setup_logging(base_level: &str) -> Result<(), AppError> {
    let filter = build_filter(base_level)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| AppError::new(2, format!("Logger initialization failed: {e}")))
}
