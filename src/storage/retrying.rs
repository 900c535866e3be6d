//! Read retry decorator
//!
//! [`RetryingStorage`] wraps any storage and re-runs `find_one`, `find_all`
//! and `find_many` when the upstream call fails with a transient
//! infrastructure error. Writes and transactions are forwarded untouched: a
//! failed write may already have been applied, so retrying it blindly could
//! duplicate it.
//!
//! Per read invocation:
//!
//! ```text
//! ATTEMPT(n) --ok--------------------------------> SUCCESS
//! ATTEMPT(n) --cancelled / unrecognised error----> FATAL (error returned as-is)
//! ATTEMPT(n) --transient error--> sleep(base * n) --> ATTEMPT(n + 1)
//! ATTEMPT(max_retries) --transient error--> sleep --> EXHAUSTED (RetryLimitExceeded)
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::Dispatch;

use crate::constants::{BASE_BACKOFF, MAX_RETRIES};
use crate::core::config::RetryConfig;
use crate::storage::{
    Decodable, StorageReader, StorageReaderWriter, StorageWriter, TransactionContext,
};
use crate::types::{Document, ObjectId, Result, StorageError};

/// Attempt limit and backoff for retried reads
///
/// The attempt limit is always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_retries` is raised to one if zero
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_backoff,
        }
    }

    /// Create a policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_backoff)
    }

    /// Maximum number of attempts per read
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff unit; attempt `n` is followed by a sleep of `base_backoff * n`
    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Sleep after a transient failure of the given 1-based attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .checked_mul(attempt)
            .unwrap_or(Duration::MAX)
    }

    /// Cumulative sleep when every attempt fails
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries)
            .map(|attempt| self.backoff(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Storage decorator that retries reads on transient errors
///
/// Generic parameter S is the wrapped implementation, which may itself be a
/// decorator.
pub struct RetryingStorage<S> {
    upstream: S,
    policy: RetryPolicy,
    /// Sink for retry diagnostics; `None` logs to the current default
    dispatch: Option<Dispatch>,
}

impl<S> RetryingStorage<S> {
    /// Wrap `upstream`, logging to whatever subscriber is current at log time
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            policy: RetryPolicy::default(),
            dispatch: None,
        }
    }

    /// Wrap `upstream`, sending retry diagnostics to `dispatch`.
    ///
    /// Pass `Dispatch::none()` to discard them.
    pub fn with_dispatch(upstream: S, dispatch: Dispatch) -> Self {
        Self {
            upstream,
            policy: RetryPolicy::default(),
            dispatch: Some(dispatch),
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The active retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// The wrapped storage
    pub fn upstream(&self) -> &S {
        &self.upstream
    }

    /// Unwrap the decorator
    pub fn into_inner(self) -> S {
        self.upstream
    }

    fn log_retry(&self, operation: &'static str, attempt: u32, err: &StorageError) {
        let kind = err.transient_kind().map(|k| k.as_str()).unwrap_or("error");
        let emit = || {
            tracing::info!(operation, attempt, error = %err, "retrying mongodb {}", kind);
        };
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, emit),
            None => emit(),
        }
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_cancelled() || !err.is_transient() {
                return Err(err);
            }

            self.log_retry(operation, attempt, &err);
            tokio::time::sleep(self.policy.backoff(attempt)).await;

            if attempt >= self.policy.max_retries {
                return Err(StorageError::retry_limit_exceeded(attempt, err));
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl<S: StorageReader> StorageReader for RetryingStorage<S> {
    async fn find_one<T: Decodable>(&self, collection: &str, filter: Document) -> Result<T> {
        self.retry("find_one", || {
            self.upstream.find_one::<T>(collection, filter.clone())
        })
        .await
    }

    async fn find_all<T: Decodable>(&self, collection: &str, filter: Document) -> Result<Vec<T>> {
        self.retry("find_all", || {
            self.upstream.find_all::<T>(collection, filter.clone())
        })
        .await
    }

    async fn find_many<T: Decodable>(
        &self,
        collection: &str,
        filter: Document,
        limit: u64,
        offset: u64,
        sort: &str,
    ) -> Result<(u64, Vec<T>)> {
        self.retry("find_many", || {
            self.upstream
                .find_many::<T>(collection, filter.clone(), limit, offset, sort)
        })
        .await
    }
}

#[async_trait]
impl<S: StorageWriter> StorageWriter for RetryingStorage<S> {
    async fn run_in_transaction<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(TransactionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.upstream.run_in_transaction(f).await
    }

    async fn insert<D>(&self, collection: &str, document: D) -> Result<()>
    where
        D: Serialize + Send + Sync,
    {
        self.upstream.insert(collection, document).await
    }

    async fn update(&self, collection: &str, id: ObjectId, update: Document) -> Result<u64> {
        self.upstream.update(collection, id, update).await
    }

    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        self.upstream.upsert(collection, filter, update).await
    }

    async fn delete(&self, collection: &str, id: ObjectId) -> Result<u64> {
        self.upstream.delete(collection, id).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        self.upstream.delete_many(collection, filter).await
    }
}

impl<S: StorageReaderWriter> StorageReaderWriter for RetryingStorage<S> {
    fn database_name(&self) -> String {
        self.upstream.database_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransientKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quiet<S>(upstream: S) -> RetryingStorage<S> {
        RetryingStorage::with_dispatch(upstream, Dispatch::none())
    }

    #[test]
    fn test_default_policy_uses_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 10);
        assert_eq!(policy.base_backoff(), Duration::from_millis(10));
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(10), Duration::from_millis(100));
        assert_eq!(policy.total_backoff(), Duration::from_millis(550));
    }

    #[test]
    fn test_zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, BASE_BACKOFF).max_retries(), 1);

        let config = RetryConfig {
            max_retries: 0,
            base_backoff: BASE_BACKOFF,
        };
        assert_eq!(RetryPolicy::from_config(&config).max_retries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_still_calls_upstream() {
        let storage = quiet(()).with_policy(RetryPolicy::new(0, Duration::from_millis(5)));
        let calls = AtomicU32::new(0);

        let err = storage
            .retry("find_one", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::transient(TransientKind::Timeout, "slow")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StorageError::RetryLimitExceeded { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_recovers_after_transient_errors() {
        let storage = quiet(());
        let calls = AtomicU32::new(0);

        let value = storage
            .retry("find_one", || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 4 {
                        Err(StorageError::transient(TransientKind::Timeout, "deadline"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_honours_custom_policy() {
        let storage = quiet(()).with_policy(RetryPolicy::new(3, Duration::from_millis(5)));
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let err = storage
            .retry("find_all", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::transient(TransientKind::Network, "reset")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::RetryLimitExceeded { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let storage = quiet(());
        let calls = AtomicU32::new(0);

        let err = storage
            .retry("find_one", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StorageError::not_found("users")) }
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
