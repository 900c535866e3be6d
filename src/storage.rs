//! Storage layer for mongostorage
//!
//! This module defines the capability traits every storage implementation
//! satisfies, so callers can depend on the traits alone and swap or stack
//! implementations without code changes:
//!
//! - [`Storage`] talks to MongoDB directly.
//! - [`RetryingStorage`] wraps any implementation and retries reads that fail
//!   with a transient infrastructure error.
//! - [`MockStorage`] is a test double driven by handler closures.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{Document, ObjectId, Result};

/// Connection helpers
pub mod client;

/// Direct MongoDB adapter
pub mod mongo;

/// Transactional context and commit/abort handling
pub mod transaction;

/// Read retry decorator
pub mod retrying;

/// Test double
pub mod mock;

/// Re-export main storage types
pub use mock::{MockStorage, TransactionBody};
pub use mongo::Storage;
pub use retrying::{RetryPolicy, RetryingStorage};
pub use transaction::TransactionContext;

/// Helper trait that combines all requirements for decoded result types
/// This cleans up generic bounds throughout the codebase
pub trait Decodable: DeserializeOwned + Unpin + Send + Sync {}

/// Blanket implementation for any type that meets the requirements
impl<T> Decodable for T where T: DeserializeOwned + Unpin + Send + Sync {}

/// Read operations
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// Decode the first document matching `filter`.
    ///
    /// Fails with [`StorageError::NotFound`](crate::StorageError::NotFound)
    /// when nothing matches.
    async fn find_one<T: Decodable>(&self, collection: &str, filter: Document) -> Result<T>;

    /// Decode every document matching `filter`; no match is an empty `Vec`
    async fn find_all<T: Decodable>(&self, collection: &str, filter: Document) -> Result<Vec<T>>;

    /// Fetch one page of documents matching `filter`.
    ///
    /// Returns the total number of matching documents, ignoring `limit` and
    /// `offset`, together with at most `limit` documents after skipping
    /// `offset`. A `limit` of zero means no limit. `sort` names a field,
    /// prefixed with `-` for descending order; an empty string leaves the
    /// order unspecified.
    async fn find_many<T: Decodable>(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<T>)>;
}

/// Write operations
#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds. Any error, including one returned by `f`,
    /// aborts the transaction; if the abort fails too, both errors are
    /// returned in [`StorageError::TransactionAborted`](crate::StorageError::TransactionAborted).
    async fn run_in_transaction<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(TransactionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static;

    /// Insert a single document
    async fn insert<D>(&self, collection: &str, document: D) -> Result<()>
    where
        D: Serialize + Send + Sync;

    /// Apply `update` to the document with the given id; returns the modified count
    async fn update(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64>;

    /// Apply `update` to the first document matching `filter`, inserting one
    /// when nothing matches; returns the upserted count
    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> Result<u64>;

    /// Delete the document with the given id; returns the deleted count
    async fn delete(&self, collection: &str, id: ObjectId) -> Result<u64>;

    /// Delete every document matching `filter`; returns the deleted count
    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64>;
}

/// Read and write operations bound to one database
pub trait StorageReaderWriter: StorageReader + StorageWriter {
    /// Name of the database this storage is bound to
    fn database_name(&self) -> String;
}

/// Driver page size for a `find_many` limit; zero stays zero, meaning no limit
pub(crate) fn page_limit(limit: u64) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Build the sort specification for a `find_many` sort string
pub fn sort_document(sort: &str) -> Option<Document> {
    let (field, direction) = match sort.strip_prefix('-') {
        Some(field) => (field, -1),
        None => (sort, 1),
    };

    if field.is_empty() {
        return None;
    }

    let mut order = Document::new();
    order.insert(field, direction);
    Some(order)
}
