use std::sync::{PoisonError, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RxError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Extension trait for converting lock errors to StorageError.
pub trait LockResultExt<T> {
    /// Converts a lock error to a StorageError.
    fn map_lock_err(self) -> Result<T, StorageError>;
}

impl<'a, T> LockResultExt<RwLockReadGuard<'a, T>>
    for Result<RwLockReadGuard<'a, T>, PoisonError<RwLockReadGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockReadGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

impl<'a, T> LockResultExt<RwLockWriteGuard<'a, T>>
    for Result<RwLockWriteGuard<'a, T>, PoisonError<RwLockWriteGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockWriteGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(String),

    /// Another writer holds a conflicting row lock. The only retryable kind.
    #[error("Write contention: {0}")]
    Contention(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Sequence row not found for date {0}")]
    RowNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Background task error: {0}")]
    Task(String),
}

impl StorageError {
    /// Returns true for transient "the world is busy" failures.
    #[inline]
    pub fn is_contention(&self) -> bool {
        matches!(self, StorageError::Contention(_))
    }
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Failed to generate order ID for {date}: {source}")]
    Allocation {
        date: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to read sequence for {date}: {source}")]
    Read {
        date: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to reset sequence for {date}: {source}")]
    Reset {
        date: String,
        #[source]
        source: StorageError,
    },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Malformed order ID: '{0}'")]
    MalformedOrderId(String),

    #[error("Sequence value {value} out of range (max {max})")]
    OutOfRange { value: u64, max: u64 },
}

/// Failure of a `with_lock` critical section.
#[derive(Error, Debug)]
pub enum LockError<E> {
    #[error("Could not acquire lock '{key}' after {attempts} attempt(s)")]
    Unavailable { key: String, attempts: u32 },

    #[error("Operation under lock '{key}' failed: {error}")]
    Operation { key: String, error: E },
}

impl<E> LockError<E> {
    /// The resource key the failure relates to.
    pub fn key(&self) -> &str {
        match self {
            LockError::Unavailable { key, .. } | LockError::Operation { key, .. } => key,
        }
    }
}

/// Error reported by an external collaborator (order store, admin backend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}: {message}")]
pub struct BackendError {
    pub context: String,
    pub message: String,
}

impl BackendError {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Order ID allocation failed: {0}")]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Lock(#[from] LockError<BackendError>),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
