//! Direct MongoDB adapter
//!
//! Each operation maps onto one driver call (`find_many` issues a count and
//! then the paged find). No retry or caching happens here.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::error::Error as DriverError;
use mongodb::{Client, Database};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::config::MongoConfig;
use crate::storage::transaction::{self, SessionOps, TransactionContext};
use crate::storage::{page_limit, sort_document, Decodable, StorageReader, StorageReaderWriter, StorageWriter};
use crate::types::{Document, ObjectId, Result, StorageError};

/// Storage bound to a single MongoDB database.
///
/// The handle is cheap to clone and holds no mutable state; the underlying
/// client and its connection pool are owned by the caller.
#[derive(Clone, Debug)]
pub struct Storage {
    database: Database,
    operation_timeout: Option<Duration>,
}

impl Storage {
    /// Create a storage for the given database
    pub fn new(database: Database) -> Self {
        Self {
            database,
            operation_timeout: None,
        }
    }

    /// Create a storage from connection settings and an already connected client
    pub fn from_config(client: &Client, config: &MongoConfig) -> Self {
        let storage = Self::new(client.database(&config.database));
        match config.operation_timeout {
            Some(timeout) => storage.with_operation_timeout(timeout),
            None => storage,
        }
    }

    /// Bound every driver call by `timeout`; an elapsed deadline is a transient timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// The underlying database handle
    pub fn database(&self) -> &Database {
        &self.database
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, DriverError>>,
    {
        match self.operation_timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, call).await??),
            None => Ok(call.await?),
        }
    }
}

#[async_trait]
impl StorageReader for Storage {
    async fn find_one<T: Decodable>(&self, collection: &str, filter: Document) -> Result<T> {
        let coll = self.database.collection::<T>(collection);
        self.guarded(coll.find_one(filter))
            .await?
            .ok_or_else(|| StorageError::not_found(collection))
    }

    async fn find_all<T: Decodable>(&self, collection: &str, filter: Document) -> Result<Vec<T>> {
        let coll = self.database.collection::<T>(collection);
        let cursor = self.guarded(coll.find(filter)).await?;
        self.guarded(cursor.try_collect::<Vec<T>>()).await
    }

    async fn find_many<T: Decodable>(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<T>)> {
        let coll = self.database.collection::<T>(collection);
        let total = self.guarded(coll.count_documents(filter.clone())).await?;

        let mut find = coll
            .find(filter)
            .limit(page_limit(limit))
            .skip(offset);
        if let Some(order) = sort_document(sort) {
            find = find.sort(order);
        }

        let cursor = self.guarded(find).await?;
        let documents = self.guarded(cursor.try_collect::<Vec<T>>()).await?;
        Ok((total, documents))
    }
}

#[async_trait]
impl StorageWriter for Storage {
    async fn run_in_transaction<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(TransactionContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let session = self
            .guarded(
                self.database
                    .client()
                    .start_session()
                    .default_transaction_options(transaction::transaction_options()),
            )
            .await?;
        let session = Arc::new(Mutex::new(session));
        let context = TransactionContext::new(Arc::new(SessionOps::new(
            self.database.clone(),
            Arc::clone(&session),
        )));

        transaction::drive(&*session, move || f(context)).await
    }

    async fn insert<D>(&self, collection: &str, document: D) -> Result<()>
    where
        D: Serialize + Send + Sync,
    {
        let coll = self.database.collection::<D>(collection);
        self.guarded(coll.insert_one(document)).await?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64> {
        let coll = self.database.collection::<Document>(collection);
        let result = self.guarded(coll.update_one(doc! { "_id": id }, update)).await?;
        Ok(result.modified_count)
    }

    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        let coll = self.database.collection::<Document>(collection);
        let result = self
            .guarded(coll.update_one(filter, update).upsert(true))
            .await?;
        Ok(u64::from(result.upserted_id.is_some()))
    }

    async fn delete(&self, collection: &str, id: ObjectId) -> Result<u64> {
        let coll = self.database.collection::<Document>(collection);
        let result = self.guarded(coll.delete_one(doc! { "_id": id })).await?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        let coll = self.database.collection::<Document>(collection);
        let result = self.guarded(coll.delete_many(filter)).await?;
        Ok(result.deleted_count)
    }
}

impl StorageReaderWriter for Storage {
    fn database_name(&self) -> String {
        self.database.name().to_string()
    }
}
