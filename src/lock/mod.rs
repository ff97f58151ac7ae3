//! Lease-based named locks for in-process critical sections.

pub mod keys;
mod manager;
mod sweeper;

pub use manager::{LockConfig, LockManager, WithLockOptions, MAX_LEASE};
pub use sweeper::LockSweeper;
