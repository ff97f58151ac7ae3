use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::contracts::{LockResultExt, StorageError, Sweeper};
use crate::lock::LockManager;

/// Background task that periodically drops expired leases from a `LockManager`.
pub struct LockSweeper {
    locks: LockManager,
    interval: Duration,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Wakes the task early, for shutdown
    wake: Arc<Notify>,
    task_handle: RwLock<Option<JoinHandle<()>>>,
}

impl LockSweeper {
    /// Creates a sweeper using the manager's configured cleanup interval.
    pub fn new(locks: LockManager) -> Self {
        let interval = locks.config().cleanup_interval;
        Self::with_interval(locks, interval)
    }

    pub fn with_interval(locks: LockManager, interval: Duration) -> Self {
        Self {
            locks,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            task_handle: RwLock::new(None),
        }
    }
}

impl Sweeper for LockSweeper {
    async fn start(&self) -> Result<(), StorageError> {
        let mut task_handle = self.task_handle.write().map_lock_err()?;
        if task_handle.is_some() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let locks = self.locks.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "Lock sweeper started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = wake.notified() => {},
                }

                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                locks.cleanup_expired_locks();
            }

            tracing::info!("Lock sweeper stopped");
        });

        *task_handle = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StorageError> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        let handle = {
            let mut task_handle = self.task_handle.write().map_lock_err()?;
            task_handle.take()
        };

        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| StorageError::Task(format!("sweeper join error: {}", e)))?;
        }

        Ok(())
    }

    fn sweep_now(&self) -> usize {
        self.locks.cleanup_expired_locks()
    }

    fn is_running(&self) -> bool {
        self.task_handle
            .read()
            .map(|h| h.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }
}
