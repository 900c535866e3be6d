//! Configuration management for mongostorage
//!
//! Settings are read from an optional TOML file and then overridden by
//! environment variables.

use crate::constants::{
    BASE_BACKOFF, CONFIG_FILE_NAME, DEFAULT_APP_NAME, DEFAULT_MONGO_DSN, MAX_RETRIES,
};
use crate::types::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub mongo: MongoConfig,

    /// Read retry tuning
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// Connection string, e.g. `mongodb://localhost:27017`
    pub uri: String,

    /// Application name reported to the server
    pub app_name: String,

    /// Logical database the storage is bound to
    pub database: String,

    /// Deadline applied to each driver call (None = driver defaults)
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration"
    )]
    pub operation_timeout: Option<Duration>,
}

/// Retry configuration for read operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per read
    pub max_retries: u32,

    /// Backoff unit; attempt `n` sleeps `base_backoff * n`
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub base_backoff: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (full, compact)
    pub format: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_MONGO_DSN.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            database: DEFAULT_APP_NAME.to_string(),
            operation_timeout: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config file
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE_NAME)
    }

    /// Load configuration from `path` if it exists, then apply environment overrides.
    ///
    /// A missing file means defaults; a file that fails to parse is an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::read_file(path.as_ref())?.unwrap_or_default();

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::read_file(path)?.ok_or_else(|| {
            StorageError::config(format!("Config file not found: {}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::config(format!(
                    "Failed to read config file: {}",
                    e
                )))
            }
        };

        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| StorageError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Connection overrides
        if let Some(uri) = lookup("MONGO_DSN") {
            self.mongo.uri = uri;
        }

        if let Some(app_name) = lookup("MONGO_APP_NAME") {
            self.mongo.app_name = app_name;
        }

        if let Some(database) = lookup("MONGO_DATABASE") {
            self.mongo.database = database;
        }

        if let Some(timeout) = lookup("MONGO_OPERATION_TIMEOUT") {
            self.mongo.operation_timeout = Some(
                parse_duration(&timeout)
                    .map_err(|e| StorageError::config(format!("Invalid operation timeout: {}", e)))?,
            );
        }

        // Retry overrides
        if let Some(max_retries) = lookup("MS_MAX_RETRIES") {
            self.retry.max_retries = max_retries
                .parse()
                .map_err(|e| StorageError::config(format!("Invalid max retries: {}", e)))?;
        }

        if let Some(backoff) = lookup("MS_BASE_BACKOFF") {
            self.retry.base_backoff = parse_duration(&backoff)
                .map_err(|e| StorageError::config(format!("Invalid base backoff: {}", e)))?;
        }

        // Logging overrides
        if let Some(level) = lookup("MS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("MS_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.mongo.uri.is_empty() {
            return Err(StorageError::config("Connection string must not be empty"));
        }

        if self.mongo.database.is_empty() {
            return Err(StorageError::config("Database name must not be empty"));
        }

        if self.retry.max_retries == 0 {
            return Err(StorageError::config("Max retries must be at least 1"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(StorageError::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "full" | "compact" => {}
            _ => return Err(StorageError::config("Invalid log format")),
        }

        Ok(())
    }
}

// For TOML parsing
use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;
use std::fmt;

// Custom deserializer for Duration from string
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string with a unit, like '10ms' or '5s'")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            parse_duration(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration(deserializer).map(Some)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", value.as_millis()))
}

fn serialize_optional_duration<S>(
    value: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serialize_duration(duration, serializer),
        None => serializer.serialize_none(),
    }
}

// Duration parser for "<n>ms", "<n>s", "<n>m" and "<n>h"; a unit is required
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (value, scale) = if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        return Ok(Duration::from_millis(ms));
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600)
    } else {
        return Err(format!("Missing unit in duration {:?} (use ms, s, m or h)", s));
    };

    let value: u64 = value
        .parse()
        .map_err(|_| format!("Invalid duration {:?}", s))?;
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration {:?} is too large", s))
}
