use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::contracts::error::StorageError;

/// Calendar-day key of a sequence counter row, in `YYYYMMDD` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateKey(String);

impl DateKey {
    /// Builds the key for a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(format!(
            "{:04}{:02}{:02}",
            date.year(),
            date.month(),
            date.day()
        ))
    }

    /// Parses a `YYYYMMDD` string, rejecting impossible dates.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StorageError::InvalidInput(format!(
                "date key must be 8 digits (YYYYMMDD), got '{}'",
                raw
            )));
        }
        NaiveDate::parse_from_str(raw, "%Y%m%d")
            .map_err(|e| StorageError::InvalidInput(format!("invalid date '{}': {}", raw, e)))?;
        Ok(Self(raw.to_string()))
    }

    /// Returns the calendar date this key names.
    pub fn to_date(&self) -> Result<NaiveDate, StorageError> {
        NaiveDate::parse_from_str(&self.0, "%Y%m%d")
            .map_err(|e| StorageError::InvalidInput(format!("invalid date '{}': {}", self.0, e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the `order_sequences` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRow {
    pub date: DateKey,
    pub sequence: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// A unit of work against the sequence counter table.
///
/// Exactly one of `commit` / `rollback` ends the transaction. Dropping an
/// unfinished transaction discards its writes.
pub trait SequenceTransaction {
    /// Creates a zero row for `date` unless one already exists.
    /// Returns true if this call created the row. Never fails on conflict.
    fn insert_if_absent(&mut self, date: &DateKey) -> Result<bool, StorageError>;

    /// Increments the counter for `date` and returns the post-increment value.
    ///
    /// The read and the write happen under this transaction's exclusive lock
    /// on the row, so no two transactions can observe the same value.
    /// Fails with `StorageError::RowNotFound` if the row does not exist.
    fn increment_and_get(&mut self, date: &DateKey) -> Result<u64, StorageError>;

    /// Reads the row for `date` without taking a lock.
    fn read(&mut self, date: &DateKey) -> Result<Option<SequenceRow>, StorageError>;

    /// Overwrites the counter for `date`, creating the row if needed.
    fn write(&mut self, date: &DateKey, sequence: u64) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Durable store of per-date sequence counters.
///
/// # Invariants
/// - One row per date, created lazily, never deleted in normal operation
/// - Values issued for a date are strictly increasing from 1 with no duplicates
pub trait SequenceStore: Send + Sync {
    /// Begins a new transaction.
    fn begin(&self) -> Result<Box<dyn SequenceTransaction + '_>, StorageError>;
}
