//! Transaction support
//!
//! [`TransactionContext`] is handed to the closure passed to
//! `run_in_transaction`. Every operation issued through it runs on the
//! transaction's session, so it commits or aborts together with the rest of
//! the transaction. The context works on raw documents underneath and
//! encodes or decodes at the edge, so the test double can back it too.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc};
use mongodb::options::{ReadConcern, ReadPreference, SelectionCriteria, TransactionOptions, WriteConcern};
use mongodb::{ClientSession, Database};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::storage::{page_limit, sort_document, Decodable};
use crate::types::{Document, ObjectId, Result, StorageError};

/// Document-level operations a [`TransactionContext`] dispatches to
#[async_trait]
pub(crate) trait DocumentOps: Send + Sync {
    fn database(&self) -> String;

    async fn fetch_one(&self, collection: &str, filter: Document) -> Result<Document>;

    async fn fetch_all(&self, collection: &str, filter: Document) -> Result<Vec<Document>>;

    async fn fetch_page(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<Document>)>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()>;

    async fn update_one(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64>;

    async fn upsert_one(&self, collection: &str, filter: Document, update: Document) -> Result<u64>;

    async fn delete_one(&self, collection: &str, id: ObjectId) -> Result<u64>;

    async fn delete_matching(&self, collection: &str, filter: Document) -> Result<u64>;
}

/// Handle used inside a transaction
#[derive(Clone)]
pub struct TransactionContext {
    ops: Arc<dyn DocumentOps>,
}

impl TransactionContext {
    pub(crate) fn new(ops: Arc<dyn DocumentOps>) -> Self {
        Self { ops }
    }

    /// Name of the database the transaction runs against
    pub fn database_name(&self) -> String {
        self.ops.database()
    }

    /// Decode the first document matching `filter`
    pub async fn find_one<T: Decodable>(&self, collection: &str, filter: Document) -> Result<T> {
        let document = self.ops.fetch_one(collection, filter).await?;
        Ok(bson::from_document(document)?)
    }

    /// Decode every document matching `filter`
    pub async fn find_all<T: Decodable>(&self, collection: &str, filter: Document) -> Result<Vec<T>> {
        decode_all(self.ops.fetch_all(collection, filter).await?)
    }

    /// Fetch one page of matching documents together with the total match count
    pub async fn find_many<T: Decodable>(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<T>)> {
        let (total, documents) = self
            .ops
            .fetch_page(collection, filter, limit, offset, sort)
            .await?;
        Ok((total, decode_all(documents)?))
    }

    /// Insert a single document
    pub async fn insert<D>(&self, collection: &str, document: D) -> Result<()>
    where
        D: Serialize + Send + Sync,
    {
        let document = bson::to_document(&document)?;
        self.ops.insert_one(collection, document).await
    }

    /// Update the document with the given id; returns the modified count
    pub async fn update(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64> {
        self.ops.update_one(collection, id, update).await
    }

    /// Update or insert by filter; returns the upserted count
    pub async fn upsert(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        self.ops.upsert_one(collection, filter, update).await
    }

    /// Delete the document with the given id; returns the deleted count
    pub async fn delete(&self, collection: &str, id: ObjectId) -> Result<u64> {
        self.ops.delete_one(collection, id).await
    }

    /// Delete every document matching `filter`; returns the deleted count
    pub async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        self.ops.delete_matching(collection, filter).await
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("database", &self.ops.database())
            .finish_non_exhaustive()
    }
}

pub(crate) fn decode_all<T: Decodable>(documents: Vec<Document>) -> Result<Vec<T>> {
    documents
        .into_iter()
        .map(|document| bson::from_document(document).map_err(StorageError::from))
        .collect()
}

/// Operations bound to a driver session
pub(crate) struct SessionOps {
    database: Database,
    session: Arc<Mutex<ClientSession>>,
}

impl SessionOps {
    pub(crate) fn new(database: Database, session: Arc<Mutex<ClientSession>>) -> Self {
        Self { database, session }
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

#[async_trait]
impl DocumentOps for SessionOps {
    fn database(&self) -> String {
        self.database.name().to_string()
    }

    async fn fetch_one(&self, collection: &str, filter: Document) -> Result<Document> {
        let mut session = self.session.lock().await;
        self.collection(collection)
            .find_one(filter)
            .session(&mut *session)
            .await?
            .ok_or_else(|| StorageError::not_found(collection))
    }

    async fn fetch_all(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        let mut session = self.session.lock().await;
        let mut cursor = self
            .collection(collection)
            .find(filter)
            .session(&mut *session)
            .await?;
        let documents: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;
        Ok(documents)
    }

    async fn fetch_page(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<Document>)> {
        let mut session = self.session.lock().await;
        let coll = self.collection(collection);
        let total = coll
            .count_documents(filter.clone())
            .session(&mut *session)
            .await?;

        let mut find = coll.find(filter).limit(page_limit(limit)).skip(offset);
        if let Some(order) = sort_document(sort) {
            find = find.sort(order);
        }

        let mut cursor = find.session(&mut *session).await?;
        let documents: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;
        Ok((total, documents))
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let mut session = self.session.lock().await;
        self.collection(collection)
            .insert_one(document)
            .session(&mut *session)
            .await?;
        Ok(())
    }

    async fn update_one(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64> {
        let mut session = self.session.lock().await;
        let result = self
            .collection(collection)
            .update_one(doc! { "_id": id }, update)
            .session(&mut *session)
            .await?;
        Ok(result.modified_count)
    }

    async fn upsert_one(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        let mut session = self.session.lock().await;
        let result = self
            .collection(collection)
            .update_one(filter, update)
            .upsert(true)
            .session(&mut *session)
            .await?;
        Ok(u64::from(result.upserted_id.is_some()))
    }

    async fn delete_one(&self, collection: &str, id: ObjectId) -> Result<u64> {
        let mut session = self.session.lock().await;
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": id })
            .session(&mut *session)
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_matching(&self, collection: &str, filter: Document) -> Result<u64> {
        let mut session = self.session.lock().await;
        let result = self
            .collection(collection)
            .delete_many(filter)
            .session(&mut *session)
            .await?;
        Ok(result.deleted_count)
    }
}

/// Default options for transaction sessions.
///
/// Transactions must read from the primary to observe their own writes.
pub(crate) fn transaction_options() -> TransactionOptions {
    TransactionOptions::builder()
        .read_concern(ReadConcern::majority())
        .write_concern(WriteConcern::majority())
        .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
        .build()
}

/// Session lifecycle used by [`drive`]
#[async_trait]
pub(crate) trait TransactionSession: Send {
    async fn start(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn abort(&mut self) -> Result<()>;
}

#[async_trait]
impl TransactionSession for ClientSession {
    async fn start(&mut self) -> Result<()> {
        self.start_transaction().await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.commit_transaction().await?;
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.abort_transaction().await?;
        Ok(())
    }
}

/// Start a transaction, run `body`, and commit.
///
/// Any failure aborts. A failed abort is reported together with the error
/// that caused it.
pub(crate) async fn drive<S, F, Fut>(session: &Mutex<S>, body: F) -> Result<()>
where
    S: TransactionSession,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let outcome = async {
        session.lock().await.start().await?;
        body().await?;
        session.lock().await.commit().await
    }
    .await;

    let err = match outcome {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    tracing::debug!(error = %err, "aborting transaction");

    // abort also fails when the transaction was already committed or aborted
    match session.lock().await.abort().await {
        Ok(()) => Err(err),
        Err(abort_err) => {
            tracing::warn!(error = %err, abort_error = %abort_err, "transaction abort failed");
            Err(StorageError::transaction_aborted(abort_err, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSession {
        calls: Vec<&'static str>,
        fail_commit: bool,
        fail_abort: bool,
    }

    #[async_trait]
    impl TransactionSession for FakeSession {
        async fn start(&mut self) -> Result<()> {
            self.calls.push("start");
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            self.calls.push("commit");
            if self.fail_commit {
                return Err(StorageError::internal("commit rejected"));
            }
            Ok(())
        }

        async fn abort(&mut self) -> Result<()> {
            self.calls.push("abort");
            if self.fail_abort {
                return Err(StorageError::internal("abort rejected"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_body_commits() {
        let session = Mutex::new(FakeSession::default());

        drive(&session, || async { Ok(()) }).await.unwrap();

        assert_eq!(session.into_inner().calls, vec!["start", "commit"]);
    }

    #[tokio::test]
    async fn test_failing_body_aborts_and_returns_original_error() {
        let session = Mutex::new(FakeSession::default());

        let err = drive(&session, || async { Err(StorageError::internal("balance below zero")) })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Internal error: balance below zero");
        assert_eq!(session.into_inner().calls, vec!["start", "abort"]);
    }

    #[tokio::test]
    async fn test_failed_abort_reports_both_errors() {
        let session = Mutex::new(FakeSession {
            fail_abort: true,
            ..Default::default()
        });

        let err = drive(&session, || async { Err(StorageError::internal("balance below zero")) })
            .await
            .unwrap_err();

        match err {
            StorageError::TransactionAborted { abort, source } => {
                assert_eq!(abort.to_string(), "Internal error: abort rejected");
                assert_eq!(source.to_string(), "Internal error: balance below zero");
            }
            other => panic!("expected TransactionAborted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_commit_is_aborted() {
        let session = Mutex::new(FakeSession {
            fail_commit: true,
            ..Default::default()
        });

        let err = drive(&session, || async { Ok(()) }).await.unwrap_err();

        assert_eq!(err.to_string(), "Internal error: commit rejected");
        assert_eq!(session.into_inner().calls, vec!["start", "commit", "abort"]);
    }

    #[test]
    fn test_transaction_options_read_from_primary() {
        use mongodb::options::{Acknowledgment, ReadConcernLevel};

        let options = transaction_options();
        assert!(matches!(
            options.read_concern,
            Some(ReadConcern { level: ReadConcernLevel::Majority, .. })
        ));
        assert!(matches!(
            options.write_concern,
            Some(WriteConcern { w: Some(Acknowledgment::Majority), .. })
        ));
        assert!(matches!(
            options.selection_criteria,
            Some(SelectionCriteria::ReadPreference(ReadPreference::Primary))
        ));
    }
}
