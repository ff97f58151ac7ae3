//! Unit-of-work execution with retry on write contention.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::contracts::{SequenceStore, SequenceTransaction, StorageError};
use crate::metrics::SequenceMetrics;

/// Configuration for transaction retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }
}

impl TransactionConfig {
    /// Creates a TransactionConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RXCOORD_TXN_MAX_RETRIES`: Maximum retry attempts (default: 3)
    /// - `RXCOORD_TXN_RETRY_INITIAL_MS`: Initial backoff delay in ms (default: 1000)
    /// - `RXCOORD_TXN_RETRY_MAX_MS`: Maximum backoff delay in ms (default: 5000)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_retries: std::env::var("RXCOORD_TXN_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_retries),
            initial_delay_ms: std::env::var("RXCOORD_TXN_RETRY_INITIAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.initial_delay_ms),
            max_delay_ms: std::env::var("RXCOORD_TXN_RETRY_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_delay_ms),
        }
    }

    /// Creates a capped exponential backoff builder (1s, 2s, 4s, 5s, ... by default).
    pub fn backoff(&self) -> ExponentialBuilder {
        self.backoff_with_retries(self.max_retries)
    }

    fn backoff_with_retries(&self, max_retries: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(2.0)
            .with_max_times(max_retries)
    }
}

/// Runs units of work inside sequence-store transactions.
pub struct TransactionManager {
    store: Arc<dyn SequenceStore>,
    config: TransactionConfig,
    metrics: Arc<SequenceMetrics>,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn SequenceStore>, config: TransactionConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(SequenceMetrics::default()),
        }
    }

    /// Records contention retries into a shared metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<SequenceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Begins a transaction, runs `work`, and commits on success.
    ///
    /// On failure the transaction is rolled back and the work's error returned.
    /// A failed rollback is logged; the original error still wins.
    pub fn execute_transaction<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut dyn SequenceTransaction) -> Result<T, StorageError>,
    {
        let mut txn = self.store.begin()?;
        match work(&mut *txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback() {
                    tracing::warn!(
                        error = %e,
                        rollback_error = %rollback_err,
                        "Transaction rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Like `execute_transaction`, retrying the whole unit of work on contention
    /// with up to `config.max_retries` retries.
    ///
    /// Errors other than contention are returned immediately without retry.
    pub async fn execute_with_retry<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        F: Fn(&mut dyn SequenceTransaction) -> Result<T, StorageError>,
    {
        self.execute_with_retries(self.config.max_retries, work)
            .await
    }

    /// `execute_with_retry` with an explicit retry budget.
    pub async fn execute_with_retries<T, F>(
        &self,
        max_retries: usize,
        work: F,
    ) -> Result<T, StorageError>
    where
        F: Fn(&mut dyn SequenceTransaction) -> Result<T, StorageError>,
    {
        let work = &work;
        (|| async move { self.execute_transaction(work) })
            .retry(self.config.backoff_with_retries(max_retries))
            .when(|e: &StorageError| e.is_contention())
            .notify(|err: &StorageError, dur: Duration| {
                self.metrics.record_contention_retry();
                tracing::warn!(
                    error = %err,
                    retry_in = ?dur,
                    "Transaction hit write contention, retrying"
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::contracts::{DateKey, SequenceRow};

    /// Store whose transactions fail with contention a fixed number of times.
    #[derive(Default)]
    struct FlakyStore {
        failures_left: AtomicUsize,
        begun: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    struct FlakyTxn<'a> {
        store: &'a FlakyStore,
    }

    impl SequenceStore for FlakyStore {
        fn begin(&self) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakyTxn { store: self }))
        }
    }

    impl SequenceTransaction for FlakyTxn<'_> {
        fn insert_if_absent(&mut self, _date: &DateKey) -> Result<bool, StorageError> {
            Ok(false)
        }

        fn increment_and_get(&mut self, _date: &DateKey) -> Result<u64, StorageError> {
            let left = self.store.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.store.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Contention("Resource busy".into()));
            }
            Ok(1)
        }

        fn read(&mut self, _date: &DateKey) -> Result<Option<SequenceRow>, StorageError> {
            Ok(None)
        }

        fn write(&mut self, _date: &DateKey, _sequence: u64) -> Result<(), StorageError> {
            Err(StorageError::InvalidInput("read-only".into()))
        }

        fn commit(self: Box<Self>) -> Result<(), StorageError> {
            self.store.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(self: Box<Self>) -> Result<(), StorageError> {
            self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config(max_retries: usize) -> TransactionConfig {
        TransactionConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn manager(store: Arc<FlakyStore>, max_retries: usize) -> TransactionManager {
        TransactionManager::new(store, fast_config(max_retries))
    }

    fn date() -> DateKey {
        DateKey::parse("20250625").unwrap()
    }

    #[test]
    fn default_config() {
        let config = TransactionConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 5_000);
    }

    #[test]
    fn commit_on_success_rollback_on_failure() {
        let store = Arc::new(FlakyStore::default());
        let tm = manager(Arc::clone(&store), 0);

        let value = tm.execute_transaction(|txn| txn.increment_and_get(&date()));
        assert_eq!(value.unwrap(), 1);
        assert_eq!(store.commits.load(Ordering::SeqCst), 1);
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 0);

        let err = tm
            .execute_transaction(|txn| txn.write(&date(), 5))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert_eq!(store.commits.load(Ordering::SeqCst), 1);
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn contention_is_retried_until_success() {
        let store = Arc::new(FlakyStore::default());
        store.failures_left.store(2, Ordering::SeqCst);
        let metrics = Arc::new(SequenceMetrics::default());
        let tm = manager(Arc::clone(&store), 3).with_metrics(Arc::clone(&metrics));

        let value = tm
            .execute_with_retry(|txn| txn.increment_and_get(&date()))
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(store.begun.load(Ordering::SeqCst), 3);
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 2);
        assert_eq!(store.commits.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.contention_retries(), 2);
    }

    #[tokio::test]
    async fn contention_exhaustion_surfaces_last_error() {
        let store = Arc::new(FlakyStore::default());
        store.failures_left.store(10, Ordering::SeqCst);
        let tm = manager(Arc::clone(&store), 2);

        let err = tm
            .execute_with_retry(|txn| txn.increment_and_get(&date()))
            .await
            .unwrap_err();

        assert!(err.is_contention());
        // First attempt plus two retries
        assert_eq!(store.begun.load(Ordering::SeqCst), 3);
        assert_eq!(store.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logical_errors_are_not_retried() {
        let store = Arc::new(FlakyStore::default());
        let tm = manager(Arc::clone(&store), 3);

        let err = tm
            .execute_with_retry(|txn| txn.write(&date(), 1))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert_eq!(store.begun.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_retry_budget_overrides_config() {
        let store = Arc::new(FlakyStore::default());
        store.failures_left.store(1, Ordering::SeqCst);
        let tm = manager(Arc::clone(&store), 3);

        let err = tm
            .execute_with_retries(0, |txn| txn.increment_and_get(&date()))
            .await
            .unwrap_err();
        assert!(err.is_contention());
        assert_eq!(store.begun.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_env_with_custom_values() {
        std::env::set_var("RXCOORD_TXN_MAX_RETRIES", "5");
        std::env::set_var("RXCOORD_TXN_RETRY_INITIAL_MS", "200");
        std::env::set_var("RXCOORD_TXN_RETRY_MAX_MS", "not_a_number");

        let config = TransactionConfig::from_env();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay_ms, 200);
        assert_eq!(config.max_delay_ms, 5_000);

        std::env::remove_var("RXCOORD_TXN_MAX_RETRIES");
        std::env::remove_var("RXCOORD_TXN_RETRY_INITIAL_MS");
        std::env::remove_var("RXCOORD_TXN_RETRY_MAX_MS");
    }
}
