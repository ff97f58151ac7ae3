use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;

use crate::contracts::{DateKey, SequenceError, StorageError};
use crate::metrics::SequenceMetrics;
use crate::orders::order_id::{OrderId, MAX_SEQUENCE};
use crate::storage::TransactionManager;

/// Allocates unique, per-day sequential order identifiers.
///
/// # Invariants
/// - For one date, issued sequences are 1, 2, 3, ... with no duplicates
/// - A sequence is spent only if its counter write committed
/// - Row creation and increment always run in the same transaction
pub struct OrderIdService {
    transactions: TransactionManager,
    metrics: Arc<SequenceMetrics>,
}

impl OrderIdService {
    pub fn new(transactions: TransactionManager, metrics: Arc<SequenceMetrics>) -> Self {
        Self {
            transactions,
            metrics,
        }
    }

    /// Allocates the next identifier for today's local calendar date.
    pub async fn generate_order_id(&self) -> Result<OrderId, SequenceError> {
        self.generate_order_id_on(chrono::Local::now().date_naive())
            .await
    }

    /// Allocates the next identifier for `date`.
    ///
    /// Any failure (retry exhaustion, malformed date, exhausted daily range)
    /// is reported as a single `SequenceError::Allocation`.
    pub async fn generate_order_id_on(&self, date: NaiveDate) -> Result<OrderId, SequenceError> {
        let started = Instant::now();
        let key = DateKey::from_date(date);

        let result = self.allocate(date, &key).await;
        match result {
            Ok(order_id) => {
                self.metrics
                    .record_allocation(started.elapsed().as_micros() as u64);
                tracing::debug!(date = %key, order_id = %order_id, "Allocated order ID");
                Ok(order_id)
            }
            Err(source) => {
                self.metrics.record_failure();
                tracing::error!(date = %key, error = %source, "Failed to allocate order ID");
                Err(SequenceError::Allocation {
                    date: key.to_string(),
                    source,
                })
            }
        }
    }

    async fn allocate(&self, date: NaiveDate, key: &DateKey) -> Result<OrderId, StorageError> {
        // Reject unencodable dates before touching the counter
        OrderId::new(date, 1).map_err(|e| StorageError::InvalidInput(e.to_string()))?;

        let sequence = self
            .transactions
            .execute_with_retry(|txn| {
                txn.insert_if_absent(key)?;
                let next = txn.increment_and_get(key)?;
                if next > MAX_SEQUENCE {
                    // Rolls back with the transaction: nothing is spent
                    return Err(StorageError::InvariantViolation(format!(
                        "daily order sequence exhausted ({} > {})",
                        next, MAX_SEQUENCE
                    )));
                }
                Ok(next)
            })
            .await?;

        OrderId::new(date, sequence).map_err(|e| StorageError::InvariantViolation(e.to_string()))
    }

    /// Returns the last sequence issued for `date` (today if `None`), or 0.
    /// Never allocates.
    pub fn get_current_sequence(&self, date: Option<NaiveDate>) -> Result<u64, SequenceError> {
        let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        let key = DateKey::from_date(date);
        self.transactions
            .execute_transaction(|txn| Ok(txn.read(&key)?.map(|row| row.sequence).unwrap_or(0)))
            .map_err(|source| SequenceError::Read {
                date: key.to_string(),
                source,
            })
    }

    /// Overwrites the counter for `date` so the next allocation returns `value + 1`.
    ///
    /// Administrative only: running this while orders are being created for the
    /// same date can hand out identifiers that were already issued.
    pub fn reset_sequence(&self, date: NaiveDate, value: u64) -> Result<(), SequenceError> {
        if value > MAX_SEQUENCE {
            return Err(SequenceError::OutOfRange {
                value,
                max: MAX_SEQUENCE,
            });
        }
        let key = DateKey::from_date(date);
        tracing::warn!(date = %key, value, "Resetting order sequence");

        self.transactions
            .execute_transaction(|txn| txn.write(&key, value))
            .map_err(|source| SequenceError::Reset {
                date: key.to_string(),
                source,
            })?;
        self.metrics.record_reset();
        Ok(())
    }
}
