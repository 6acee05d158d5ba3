//! Tracing subscriber initialization
//!
//! `RUST_LOG` wins when set; otherwise the configured level is used.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{BatchError, Result};

/// Install a global fmt subscriber filtered at `default_level`
///
/// # Errors
///
/// Returns an error if the level is not a valid filter directive or a
/// global subscriber is already installed.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| {
            BatchError::Telemetry(format!("invalid log level '{}': {}", default_level, e))
        })?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| BatchError::Telemetry(format!("failed to init tracing subscriber: {}", e)))
}
