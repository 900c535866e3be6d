//! Logging setup
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::core::config::LoggingConfig;
use crate::types::{Result, StorageError};

/// Install a global fmt subscriber built from the logging configuration.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| StorageError::config(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format.as_str() {
        "compact" => builder.compact().try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| StorageError::config(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(
        "Initialized {} v{} logging",
        crate::NAME,
        crate::VERSION
    );
    Ok(())
}
