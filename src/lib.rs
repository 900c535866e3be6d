//! mongostorage - MongoDB document storage behind capability traits
//!
//! Callers program against [`StorageReader`], [`StorageWriter`] and
//! [`StorageReaderWriter`]. [`Storage`] implements them directly on top of
//! the MongoDB driver; [`RetryingStorage`] wraps any implementation and
//! retries reads on transient infrastructure failures; [`MockStorage`] is a
//! closure-driven test double.
//!
//! ```no_run
//! use mongostorage::{doc, Config, RetryingStorage, StorageReader};
//!
//! # async fn run() -> mongostorage::Result<()> {
//! let config = Config::load()?;
//! let storage = RetryingStorage::new(mongostorage::connect_storage(&config.mongo).await?)
//!     .with_policy(mongostorage::RetryPolicy::from_config(&config.retry));
//!
//! let (total, page): (u64, Vec<mongostorage::Document>) = storage
//!     .find_many("users", doc! { "active": true }, 10, 0, "-age")
//!     .await?;
//! println!("{} of {} users", page.len(), total);
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;
pub mod types;

// Main functional modules
pub mod storage;

// Re-export commonly used items for convenience
pub use crate::core::Config;
pub use mongodb::bson::doc;
pub use storage::client::{connect, connect_storage};
pub use storage::{
    MockStorage, RetryPolicy, RetryingStorage, Storage, StorageReader, StorageReaderWriter,
    StorageWriter, TransactionBody, TransactionContext,
};
pub use types::{
    object_id, try_object_id, Document, ObjectId, Result, StorageError, TransientKind,
};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install logging as configured
pub fn init(config: &Config) -> Result<()> {
    crate::core::logging::init(&config.logging)
}
