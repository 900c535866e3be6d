//! Global constants used throughout the mongostorage codebase
//!
//! Retry tuning lives here rather than as literals inside the retry loop so
//! that the policy defaults can be referenced from configuration and tests.

use std::time::Duration;

/// Maximum number of attempts a retried read makes before giving up
pub const MAX_RETRIES: u32 = 10;

/// Base backoff between read attempts
///
/// Backoff grows linearly: attempt `n` sleeps `BASE_BACKOFF * n` before the
/// next attempt, so ten failed attempts sleep 550ms in total.
pub const BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Byte length of a document identifier
pub const OBJECT_ID_LENGTH: usize = 12;

/// Database name returned by the test double
pub const MOCK_DATABASE_NAME: &str = "test-database";

/// Default connection string used when none is configured
pub const DEFAULT_MONGO_DSN: &str = "mongodb://localhost:27017";

/// Default application name reported to the server
pub const DEFAULT_APP_NAME: &str = "mongostorage";

/// Default configuration file looked up by `Config::load`
pub const CONFIG_FILE_NAME: &str = "mongostorage.toml";

/// Server error code for an operation that exceeded its `maxTimeMS`
pub const MAX_TIME_MS_EXPIRED_CODE: i32 = 50;

/// Error labels that mark a driver error as a timeout
pub const TIMEOUT_ERROR_LABELS: [&str; 2] = ["NetworkTimeoutError", "ExceededTimeLimitError"];

/// Error label that marks a driver error as a network failure
pub const NETWORK_ERROR_LABEL: &str = "NetworkError";
