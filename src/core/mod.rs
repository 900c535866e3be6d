//! Core configuration and process-level setup

/// Library configuration
pub mod config;

/// Subscriber installation
pub mod logging;

// Re-export commonly used items
pub use config::{Config, LoggingConfig, MongoConfig, RetryConfig};
