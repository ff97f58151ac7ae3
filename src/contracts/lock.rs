use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque proof of lock ownership, checked on release and renew.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the caller holding (or requesting) a lock.
///
/// Threaded explicitly through every lock call so that re-entrant
/// acquisition of a key by its current holder can be detected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner(String);

impl LockOwner {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a process-unique owner id of the form `prefix-<pid>-<seq>`.
    pub fn generate(prefix: &str) -> Self {
        static NEXT_OWNER_SEQ: AtomicU64 = AtomicU64::new(1);
        let seq = NEXT_OWNER_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}-{}", prefix, std::process::id(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time view of one lock table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub key: String,
    pub owner: LockOwner,
    pub held_for_ms: u64,
    /// Zero once the lease has run out.
    pub expires_in_ms: u64,
    pub expired: bool,
    pub renew_count: u32,
}

/// Snapshot returned by `LockManager::stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockStats {
    pub active_locks: usize,
    pub expired_locks: usize,
    pub locks: Vec<LockInfo>,
    pub acquired_total: u64,
    pub released_total: u64,
    pub timeouts_total: u64,
    pub reentrant_rejections_total: u64,
    pub token_mismatches_total: u64,
    pub renewals_total: u64,
    pub expired_swept_total: u64,
}
