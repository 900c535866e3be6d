//! Error types and handling for mongostorage
//!
//! Every storage operation fails with a [`StorageError`]. Driver errors are
//! classified on conversion: the handful of driver signals that indicate an
//! operation likely did not reach durable state become
//! [`StorageError::Transient`], everything else stays opaque.

use std::fmt;
use std::io;

use mongodb::bson;
use mongodb::error::{Error as DriverError, ErrorKind};
use thiserror::Error;

use crate::constants::{MAX_TIME_MS_EXPIRED_CODE, NETWORK_ERROR_LABEL, TIMEOUT_ERROR_LABELS};

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, StorageError>;

/// Boxed error used as the source of transient failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Infrastructure failure categories the retry decorator recovers from
///
/// The set is closed. Variants are listed in the order they are checked when
/// classifying a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    /// The client was shut down or disconnected underneath the operation
    ClientDisconnected,
    /// The operation or its socket timed out
    Timeout,
    /// Any other network failure
    Network,
    /// The connection pool was cleared and the checkout can be retried
    PoolExhausted,
    /// No connection or server could be acquired within the wait bound
    WaitQueueTimeout,
}

impl TransientKind {
    /// All categories in classification order
    pub const ALL: [TransientKind; 5] = [
        TransientKind::ClientDisconnected,
        TransientKind::Timeout,
        TransientKind::Network,
        TransientKind::PoolExhausted,
        TransientKind::WaitQueueTimeout,
    ];

    /// Short label used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::ClientDisconnected => "client disconnected",
            TransientKind::Timeout => "timeout",
            TransientKind::Network => "network error",
            TransientKind::PoolExhausted => "pool error",
            TransientKind::WaitQueueTimeout => "wait queue timeout",
        }
    }

    /// Map a driver error onto a transient category, if it is one
    pub fn classify(err: &DriverError) -> Option<Self> {
        let kind = err.kind.as_ref();

        if matches!(kind, ErrorKind::Shutdown) {
            return Some(TransientKind::ClientDisconnected);
        }

        let timed_out = match kind {
            ErrorKind::Io(inner) => inner.kind() == io::ErrorKind::TimedOut,
            ErrorKind::Command(command) => command.code == MAX_TIME_MS_EXPIRED_CODE,
            _ => false,
        };
        if timed_out || TIMEOUT_ERROR_LABELS.iter().any(|label| err.contains_label(label)) {
            return Some(TransientKind::Timeout);
        }

        if matches!(kind, ErrorKind::Io(_)) || err.contains_label(NETWORK_ERROR_LABEL) {
            return Some(TransientKind::Network);
        }

        match kind {
            ErrorKind::ConnectionPoolCleared { .. } => Some(TransientKind::PoolExhausted),
            ErrorKind::ServerSelection { .. } => Some(TransientKind::WaitQueueTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// A single-document read matched nothing
    #[error("no document found in collection {collection}")]
    NotFound {
        /// Collection that was queried
        collection: String,
    },

    /// Infrastructure failure that may succeed on a later attempt
    #[error("{kind}: {source}")]
    Transient {
        /// Failure category
        kind: TransientKind,
        /// Underlying error
        #[source]
        source: BoxError,
    },

    /// Every attempt of a retried read failed with a transient error
    #[error("exceeded retry limit after {attempts} attempts: {source}")]
    RetryLimitExceeded {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        #[source]
        source: Box<StorageError>,
    },

    /// The caller withdrew interest in the operation
    #[error("operation cancelled")]
    Cancelled,

    /// A transaction failed and rolling it back failed as well
    #[error("transaction abort failed: {abort}; original error: {source}")]
    TransactionAborted {
        /// Error returned by the abort
        abort: Box<StorageError>,
        /// Error that triggered the abort
        #[source]
        source: Box<StorageError>,
    },

    /// A document id could not be parsed
    #[error("invalid document id: {0:?}")]
    InvalidId(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value could not be encoded as BSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    /// A stored document could not be decoded into the requested type
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    /// Driver error outside the transient categories
    #[error("MongoDB error: {0}")]
    Driver(#[source] DriverError),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Create a transient error of the given category
    pub fn transient(kind: TransientKind, source: impl Into<BoxError>) -> Self {
        Self::Transient {
            kind,
            source: source.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(collection: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap the final error of an exhausted retry loop
    pub fn retry_limit_exceeded(attempts: u32, last: StorageError) -> Self {
        Self::RetryLimitExceeded {
            attempts,
            source: Box::new(last),
        }
    }

    /// Combine a failed abort with the error that caused it
    pub fn transaction_aborted(abort: StorageError, source: StorageError) -> Self {
        Self::TransactionAborted {
            abort: Box::new(abort),
            source: Box::new(source),
        }
    }

    /// Transient category of this error, if it has one
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            StorageError::Transient { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Check if a retried read may recover from this error
    pub fn is_transient(&self) -> bool {
        self.transient_kind().is_some()
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled)
    }

    /// Check if a single-document read found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Check if retries were already exhausted
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, StorageError::RetryLimitExceeded { .. })
    }

    /// Error returned by the final attempt of an exhausted retry loop
    pub fn last_error(&self) -> Option<&StorageError> {
        match self {
            StorageError::RetryLimitExceeded { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DriverError> for StorageError {
    fn from(err: DriverError) -> Self {
        match TransientKind::classify(&err) {
            Some(kind) => StorageError::transient(kind, err),
            None => StorageError::Driver(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for StorageError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        StorageError::transient(TransientKind::Timeout, err)
    }
}
