//! Shared helpers for integration tests

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use mongostorage::{connect, Storage};
use tracing_subscriber::fmt::MakeWriter;

/// Collection name used by most live tests
pub const USERS: &str = "users";

/// A throwaway database on the server named by `MONGO_DSN`
pub struct TestDb {
    pub client: mongodb::Client,
    pub name: String,
}

impl TestDb {
    /// Connect to the server in `MONGO_DSN`, or `None` to skip the test
    pub async fn connect() -> Option<Self> {
        let dsn = std::env::var("MONGO_DSN").ok()?;
        let client = connect(&dsn, "mongostorage-tests")
            .await
            .expect("MONGO_DSN should parse");
        let name = format!("mongostorage_test_{}", uuid::Uuid::new_v4().simple());
        Some(Self { client, name })
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.client.database(&self.name))
    }

    pub async fn drop(self) {
        self.client
            .database(&self.name)
            .drop()
            .await
            .expect("test database should drop");
    }
}

/// Skip the current test when no live server is configured
#[macro_export]
macro_rules! live_db {
    () => {
        match common::TestDb::connect().await {
            Some(db) => db,
            None => {
                eprintln!("MONGO_DSN not set; skipping");
                return;
            }
        }
    };
}

/// In-memory log sink for asserting on emitted events
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// A dispatch that writes plain-text events into this buffer
    pub fn dispatch(&self) -> tracing::Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::Dispatch::new(subscriber)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
