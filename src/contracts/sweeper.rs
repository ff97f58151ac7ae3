use std::future::Future;

use crate::contracts::error::StorageError;

/// Timer-driven garbage collection of expired leases.
///
/// # Behavior
/// - Runs every N seconds, or immediately on `sweep_now`
/// - Removes lock entries whose lease has elapsed
/// - Purely a liveness aid: acquisition already treats expired leases as free
pub trait Sweeper: Send + Sync {
    /// Starts the sweeper background task.
    fn start(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Stops the sweeper and waits for the task to exit.
    fn stop(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Runs one sweep immediately, returning the number of entries removed.
    fn sweep_now(&self) -> usize;

    /// Returns true while the background task is running.
    fn is_running(&self) -> bool;
}
