//! Structured logging setup

use crate::{CamcastError, CamcastResult};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber
///
/// `RUST_LOG`, when set, takes precedence over `default_directive`
/// (e.g. `"info"` or `"camcast=debug"`).
pub fn init(default_directive: &str) -> CamcastResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            CamcastError::InvalidConfiguration {
                field: "log_level".to_string(),
                reason: e.to_string(),
            }
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| CamcastError::InvalidConfiguration {
            field: "logging".to_string(),
            reason: e.to_string(),
        })
}
