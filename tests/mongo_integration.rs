//! Live tests against a MongoDB server.
//!
//! Skipped unless `MONGO_DSN` is set. Transaction tests additionally need a
//! replica set and run only when `MONGO_TRANSACTIONS` is set.

#[macro_use]
mod common;

use mongostorage::{
    doc, Document, ObjectId, RetryingStorage, StorageError, StorageReader, StorageReaderWriter,
    StorageWriter, TransactionContext,
};
use serde::{Deserialize, Serialize};

use common::USERS;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct User {
    #[serde(rename = "_id")]
    id: ObjectId,
    name: String,
    age: i32,
}

impl User {
    fn new(name: &str, age: i32) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.to_string(),
            age,
        }
    }
}

#[tokio::test]
async fn insert_then_find_one() {
    let db = live_db!();
    let storage = db.storage();
    let ada = User::new("ada", 36);

    storage.insert(USERS, ada.clone()).await.unwrap();
    let found: User = storage.find_one(USERS, doc! { "name": "ada" }).await.unwrap();
    assert_eq!(found, ada);

    db.drop().await;
}

#[tokio::test]
async fn find_one_without_match_is_not_found() {
    let db = live_db!();
    let storage = db.storage();

    let err = storage
        .find_one::<User>(USERS, doc! { "name": "nobody" })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { ref collection } if collection == USERS));

    db.drop().await;
}

#[tokio::test]
async fn find_all_without_match_is_empty() {
    let db = live_db!();
    let storage = db.storage();

    let users: Vec<User> = storage.find_all(USERS, doc! { "age": 999 }).await.unwrap();
    assert!(users.is_empty());

    db.drop().await;
}

#[tokio::test]
async fn find_many_pages_sorted_descending() {
    let db = live_db!();
    let storage = db.storage();
    for age in 20..35 {
        storage
            .insert(USERS, User::new(&format!("user{age}"), age))
            .await
            .unwrap();
    }

    let (total, page): (u64, Vec<User>) = storage
        .find_many(USERS, doc! {}, 10, 0, "-age")
        .await
        .unwrap();
    assert_eq!(total, 15);
    let ages: Vec<i32> = page.iter().map(|u| u.age).collect();
    assert_eq!(ages, (25..35).rev().collect::<Vec<_>>());

    let (total, page): (u64, Vec<User>) = storage
        .find_many(USERS, doc! {}, 10, 10, "age")
        .await
        .unwrap();
    assert_eq!(total, 15);
    assert_eq!(page.len(), 5);
    assert_eq!(page[0].age, 30);

    // zero limit returns everything after the offset
    let (_, page): (u64, Vec<User>) = storage.find_many(USERS, doc! {}, 0, 3, "").await.unwrap();
    assert_eq!(page.len(), 12);

    db.drop().await;
}

#[tokio::test]
async fn upsert_reports_inserted_documents_only() {
    let db = live_db!();
    let storage = db.storage();

    let inserted = storage
        .upsert(USERS, doc! { "name": "grace" }, doc! { "$set": { "age": 45 } })
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let inserted = storage
        .upsert(USERS, doc! { "name": "grace" }, doc! { "$set": { "age": 46 } })
        .await
        .unwrap();
    assert_eq!(inserted, 0);

    let grace: Document = storage.find_one(USERS, doc! { "name": "grace" }).await.unwrap();
    assert_eq!(grace.get_i32("age").unwrap(), 46);
    let all: Vec<Document> = storage.find_all(USERS, doc! {}).await.unwrap();
    assert_eq!(all.len(), 1);

    db.drop().await;
}

#[tokio::test]
async fn update_and_delete_by_id() {
    let db = live_db!();
    let storage = db.storage();
    let alan = User::new("alan", 41);
    storage.insert(USERS, alan.clone()).await.unwrap();

    let modified = storage
        .update(USERS, alan.id, doc! { "$set": { "age": 42 } })
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let missing = mongostorage::object_id("not-an-id");
    assert_eq!(storage.delete(USERS, missing).await.unwrap(), 0);
    assert_eq!(storage.delete(USERS, alan.id).await.unwrap(), 1);

    db.drop().await;
}

#[tokio::test]
async fn delete_many_counts_removed_documents() {
    let db = live_db!();
    let storage = db.storage();
    for (name, age) in [("a", 10), ("b", 20), ("c", 30)] {
        storage.insert(USERS, User::new(name, age)).await.unwrap();
    }

    let removed = storage
        .delete_many(USERS, doc! { "age": { "$gte": 20 } })
        .await
        .unwrap();
    assert_eq!(removed, 2);

    db.drop().await;
}

#[tokio::test]
async fn retrying_storage_reads_through() {
    let db = live_db!();
    let storage = RetryingStorage::new(db.storage());
    storage.insert(USERS, User::new("edsger", 72)).await.unwrap();

    let found: User = storage.find_one(USERS, doc! { "name": "edsger" }).await.unwrap();
    assert_eq!(found.age, 72);
    assert_eq!(storage.database_name(), db.name);

    db.drop().await;
}

fn transactions_enabled() -> bool {
    std::env::var("MONGO_TRANSACTIONS").is_ok()
}

#[tokio::test]
async fn transaction_commits_on_success() {
    if !transactions_enabled() {
        return;
    }
    let db = live_db!();
    let storage = db.storage();
    // older servers cannot create collections inside a transaction
    storage.insert(USERS, User::new("seed", 1)).await.unwrap();

    storage
        .run_in_transaction(|tx| async move {
            tx.insert(USERS, User::new("barbara", 30)).await?;
            set_age(&tx, "barbara", 31).await
        })
        .await
        .unwrap();

    let barbara: User = storage.find_one(USERS, doc! { "name": "barbara" }).await.unwrap();
    assert_eq!(barbara.age, 31);

    db.drop().await;
}

#[tokio::test]
async fn transaction_body_error_rolls_back() {
    if !transactions_enabled() {
        return;
    }
    let db = live_db!();
    let storage = db.storage();
    storage.insert(USERS, User::new("seed", 1)).await.unwrap();

    let err = storage
        .run_in_transaction(|tx| async move {
            tx.insert(USERS, User::new("ken", 80)).await?;
            Err(StorageError::internal("insufficient funds"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Internal error: insufficient funds");

    let users: Vec<User> = storage.find_all(USERS, doc! { "name": "ken" }).await.unwrap();
    assert!(users.is_empty());

    db.drop().await;
}

async fn set_age(tx: &TransactionContext, name: &str, age: i32) -> mongostorage::Result<()> {
    let user: User = tx.find_one(USERS, doc! { "name": name }).await?;
    tx.update(USERS, user.id, doc! { "$set": { "age": age } }).await?;
    Ok(())
}
