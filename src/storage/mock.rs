//! Handler-driven test double
//!
//! Each operation is backed by an optional closure. Read handlers return raw
//! documents which the mock decodes into the requested type, the same way the
//! driver would. An operation without a handler fails with
//! [`StorageError::Internal`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use mongodb::bson::{self, Bson};
use serde::Serialize;

use crate::constants::MOCK_DATABASE_NAME;
use crate::storage::transaction::{decode_all, DocumentOps};
use crate::storage::{
    Decodable, StorageReader, StorageReaderWriter, StorageWriter, TransactionContext,
};
use crate::types::{Document, ObjectId, Result, StorageError};

/// Transaction body handed to a mock transaction handler
pub type TransactionBody =
    Box<dyn FnOnce(TransactionContext) -> BoxFuture<'static, Result<()>> + Send>;

type FindOneFn = Arc<dyn Fn(&str, &Document) -> Result<Document> + Send + Sync>;
type FindAllFn = Arc<dyn Fn(&str, &Document) -> Result<Vec<Document>> + Send + Sync>;
type FindManyFn =
    Arc<dyn Fn(&str, &Document, u64, u64, &str) -> Result<(u64, Vec<Document>)> + Send + Sync>;
type TransactionFn = Arc<
    dyn Fn(TransactionContext, TransactionBody) -> BoxFuture<'static, Result<()>> + Send + Sync,
>;
type InsertFn = Arc<dyn Fn(&str, Document) -> Result<()> + Send + Sync>;
type UpdateFn = Arc<dyn Fn(&str, ObjectId, &Document) -> Result<u64> + Send + Sync>;
type UpsertFn = Arc<dyn Fn(&str, &Document, &Document) -> Result<u64> + Send + Sync>;
type DeleteFn = Arc<dyn Fn(&str, ObjectId) -> Result<u64> + Send + Sync>;
type DeleteManyFn = Arc<dyn Fn(&str, &Document) -> Result<u64> + Send + Sync>;

/// Storage whose behaviour is supplied by closures
///
/// Clones share their handlers.
#[derive(Default, Clone)]
pub struct MockStorage {
    find_one: Option<FindOneFn>,
    find_all: Option<FindAllFn>,
    find_many: Option<FindManyFn>,
    run_in_transaction: Option<TransactionFn>,
    insert: Option<InsertFn>,
    update: Option<UpdateFn>,
    upsert: Option<UpsertFn>,
    delete: Option<DeleteFn>,
    delete_many: Option<DeleteManyFn>,
}

impl MockStorage {
    /// Create a mock with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose `find_all` decodes a fixed extended-JSON array
    ///
    /// ```
    /// use mongostorage::MockStorage;
    ///
    /// let mock = MockStorage::find_all_stub(r#"[{"_id": {"$oid": "507f1f77bcf86cd799439011"}}]"#);
    /// assert!(mock.is_ok());
    /// ```
    pub fn find_all_stub(json: &str) -> Result<Self> {
        let documents = parse_documents(json)?;
        Ok(Self::new().with_find_all(move |_, _| Ok(documents.clone())))
    }

    /// Set the `find_one` handler
    pub fn with_find_one<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Document) -> Result<Document> + Send + Sync + 'static,
    {
        self.find_one = Some(Arc::new(handler));
        self
    }

    /// Set the `find_all` handler
    pub fn with_find_all<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Document) -> Result<Vec<Document>> + Send + Sync + 'static,
    {
        self.find_all = Some(Arc::new(handler));
        self
    }

    /// Set the `find_many` handler; it receives collection, filter, limit, offset and sort
    pub fn with_find_many<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Document, u64, u64, &str) -> Result<(u64, Vec<Document>)>
            + Send
            + Sync
            + 'static,
    {
        self.find_many = Some(Arc::new(handler));
        self
    }

    /// Set the `run_in_transaction` handler.
    ///
    /// The handler receives a context whose operations go to this mock's
    /// handlers, together with the transaction body. Calling `body(context)`
    /// runs the body; the handler's result is the transaction outcome.
    ///
    /// ```
    /// use mongostorage::MockStorage;
    ///
    /// let mock = MockStorage::new().with_run_in_transaction(|context, body| body(context));
    /// ```
    pub fn with_run_in_transaction<F>(mut self, handler: F) -> Self
    where
        F: Fn(TransactionContext, TransactionBody) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.run_in_transaction = Some(Arc::new(handler));
        self
    }

    /// Set the `insert` handler; it receives the document already encoded
    pub fn with_insert<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Document) -> Result<()> + Send + Sync + 'static,
    {
        self.insert = Some(Arc::new(handler));
        self
    }

    /// Set the `update` handler
    pub fn with_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, ObjectId, &Document) -> Result<u64> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(handler));
        self
    }

    /// Set the `upsert` handler
    pub fn with_upsert<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Document, &Document) -> Result<u64> + Send + Sync + 'static,
    {
        self.upsert = Some(Arc::new(handler));
        self
    }

    /// Set the `delete` handler
    pub fn with_delete<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, ObjectId) -> Result<u64> + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(handler));
        self
    }

    /// Set the `delete_many` handler
    pub fn with_delete_many<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Document) -> Result<u64> + Send + Sync + 'static,
    {
        self.delete_many = Some(Arc::new(handler));
        self
    }
}

fn missing(operation: &str) -> StorageError {
    StorageError::internal(format!("mock storage has no {operation} handler"))
}

/// Parse an extended-JSON array into documents
fn parse_documents(json: &str) -> Result<Vec<Document>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| StorageError::internal(format!("invalid stub JSON: {e}")))?;
    let parsed = Bson::try_from(value)
        .map_err(|e| StorageError::internal(format!("invalid extended JSON: {e}")))?;

    match parsed {
        Bson::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(document) => Ok(document),
                other => Err(StorageError::internal(format!(
                    "stub element is not a document: {other}"
                ))),
            })
            .collect(),
        other => Err(StorageError::internal(format!(
            "stub must be a JSON array, got {other}"
        ))),
    }
}

#[async_trait]
impl DocumentOps for MockStorage {
    fn database(&self) -> String {
        MOCK_DATABASE_NAME.to_string()
    }

    async fn fetch_one(&self, collection: &str, filter: Document) -> Result<Document> {
        let handler = self.find_one.as_ref().ok_or_else(|| missing("find_one"))?;
        handler(collection, &filter)
    }

    async fn fetch_all(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        let handler = self.find_all.as_ref().ok_or_else(|| missing("find_all"))?;
        handler(collection, &filter)
    }

    async fn fetch_page(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<Document>)> {
        let handler = self.find_many.as_ref().ok_or_else(|| missing("find_many"))?;
        handler(collection, &filter, limit, offset, sort)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let handler = self.insert.as_ref().ok_or_else(|| missing("insert"))?;
        handler(collection, document)
    }

    async fn update_one(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64> {
        let handler = self.update.as_ref().ok_or_else(|| missing("update"))?;
        handler(collection, id, &update)
    }

    async fn upsert_one(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        let handler = self.upsert.as_ref().ok_or_else(|| missing("upsert"))?;
        handler(collection, &filter, &update)
    }

    async fn delete_one(&self, collection: &str, id: ObjectId) -> Result<u64> {
        let handler = self.delete.as_ref().ok_or_else(|| missing("delete"))?;
        handler(collection, id)
    }

    async fn delete_matching(&self, collection: &str, filter: Document) -> Result<u64> {
        let handler = self.delete_many.as_ref().ok_or_else(|| missing("delete_many"))?;
        handler(collection, &filter)
    }
}

#[async_trait]
impl StorageReader for MockStorage {
    async fn find_one<T: Decodable>(&self, collection: &str, filter: Document) -> Result<T> {
        let document = self.fetch_one(collection, filter).await?;
        Ok(bson::from_document(document)?)
    }

    async fn find_all<T: Decodable>(&self, collection: &str, filter: Document) -> Result<Vec<T>> {
        decode_all(self.fetch_all(collection, filter).await?)
    }

    async fn find_many<T: Decodable>(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<T>)> {
        let (total, documents) = self
            .fetch_page(collection, filter, limit, offset, sort)
            .await?;
        Ok((total, decode_all(documents)?))
    }
}

#[async_trait]
impl StorageWriter for MockStorage {
    async fn run_in_transaction<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(TransactionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = self
            .run_in_transaction
            .as_ref()
            .ok_or_else(|| missing("run_in_transaction"))?;

        let context = TransactionContext::new(Arc::new(self.clone()));
        let body: TransactionBody = Box::new(move |context: TransactionContext| f(context).boxed());
        handler(context, body).await
    }

    async fn insert<D>(&self, collection: &str, document: D) -> Result<()>
    where
        D: Serialize + Send + Sync,
    {
        let document = bson::to_document(&document)?;
        self.insert_one(collection, document).await
    }

    async fn update(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64> {
        self.update_one(collection, id, update).await
    }

    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        self.upsert_one(collection, filter, update).await
    }

    async fn delete(&self, collection: &str, id: ObjectId) -> Result<u64> {
        self.delete_one(collection, id).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        self.delete_matching(collection, filter).await
    }
}

impl StorageReaderWriter for MockStorage {
    fn database_name(&self) -> String {
        MOCK_DATABASE_NAME.to_string()
    }
}

impl fmt::Debug for MockStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockStorage")
            .field("find_one", &self.find_one.is_some())
            .field("find_all", &self.find_all.is_some())
            .field("find_many", &self.find_many.is_some())
            .field("run_in_transaction", &self.run_in_transaction.is_some())
            .field("insert", &self.insert.is_some())
            .field("update", &self.update.is_some())
            .field("upsert", &self.upsert.is_some())
            .field("delete", &self.delete.is_some())
            .field("delete_many", &self.delete_many.is_some())
            .finish()
    }
}
