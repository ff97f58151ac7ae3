use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::contracts::{LockError, LockInfo, LockOwner, LockStats, LockToken};
use crate::metrics::LockMetrics;

/// Configuration for the lock manager.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lease granted when the caller does not specify one.
    pub default_lease: Duration,
    /// How long `acquire` polls before giving up, when not specified.
    pub default_max_wait: Duration,
    /// First backoff step between acquisition attempts.
    pub backoff_base: Duration,
    /// Upper bound on the exponential part of the backoff.
    pub backoff_max: Duration,
    /// Random extra delay added to every backoff step, drawn from `[0, jitter]`.
    pub jitter: Duration,
    /// `with_lock` waits `retry_delay * attempt` between attempts.
    pub retry_delay: Duration,
    /// Interval between expired-lease sweeps.
    pub cleanup_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_lease: Duration::from_secs(30),
            default_max_wait: Duration::from_secs(10),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_secs(1),
            jitter: Duration::from_millis(10),
            retry_delay: Duration::from_millis(100),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl LockConfig {
    /// Creates a LockConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RXCOORD_LOCK_LEASE_MS`: Default lease in ms (default: 30000)
    /// - `RXCOORD_LOCK_MAX_WAIT_MS`: Default acquisition wait in ms (default: 10000)
    /// - `RXCOORD_LOCK_BACKOFF_BASE_MS`: First backoff step in ms (default: 10)
    /// - `RXCOORD_LOCK_BACKOFF_MAX_MS`: Backoff cap in ms (default: 1000)
    /// - `RXCOORD_LOCK_JITTER_MS`: Maximum jitter in ms (default: 10)
    /// - `RXCOORD_LOCK_RETRY_DELAY_MS`: `with_lock` retry step in ms (default: 100)
    /// - `RXCOORD_LOCK_CLEANUP_INTERVAL_SECS`: Sweep interval in seconds (default: 60)
    pub fn from_env() -> Self {
        let default = Self::default();
        let millis = |name: &str, fallback: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            default_lease: millis("RXCOORD_LOCK_LEASE_MS", default.default_lease),
            default_max_wait: millis("RXCOORD_LOCK_MAX_WAIT_MS", default.default_max_wait),
            backoff_base: millis("RXCOORD_LOCK_BACKOFF_BASE_MS", default.backoff_base),
            backoff_max: millis("RXCOORD_LOCK_BACKOFF_MAX_MS", default.backoff_max),
            jitter: millis("RXCOORD_LOCK_JITTER_MS", default.jitter),
            retry_delay: millis("RXCOORD_LOCK_RETRY_DELAY_MS", default.retry_delay),
            cleanup_interval: std::env::var("RXCOORD_LOCK_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.cleanup_interval),
        }
    }

    /// Pause after failed `with_lock` attempt `attempt`: `retry_delay * attempt`, saturating.
    pub fn retry_pause(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }

    /// Backoff before attempt `attempt + 1`: `min(base * 2^attempt, max) + jitter`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .backoff_base
            .checked_mul(2u32.saturating_pow(attempt.min(31)))
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        exponential + Duration::from_millis(jitter)
    }
}

/// Options for one `with_lock` call.
#[derive(Debug, Clone)]
pub struct WithLockOptions {
    pub lease: Duration,
    pub max_wait: Duration,
    /// Total acquire-then-run attempts, at least 1.
    pub retries: u32,
    /// Renew the lease every `lease / 2` while the critical section runs.
    pub auto_renew: bool,
}

impl WithLockOptions {
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            lease: config.default_lease,
            max_wait: config.default_max_wait,
            retries: 3,
            auto_renew: false,
        }
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }
}

impl Default for WithLockOptions {
    fn default() -> Self {
        Self::from_config(&LockConfig::default())
    }
}

/// One live (or not yet swept) lease.
#[derive(Debug, Clone)]
struct LockEntry {
    token: LockToken,
    owner: LockOwner,
    acquired_at: Instant,
    expires_at: Instant,
    renew_count: u32,
}

impl LockEntry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Advisory, lease-based mutual exclusion over string keys.
///
/// At most one non-expired lease exists per key. A holder that never releases
/// stops blocking others once its lease runs out. Acquisition is best-effort
/// polling, not FIFO: a newcomer may win a freshly expired lease before an
/// older waiter's next attempt.
///
/// Re-entrancy detection only covers a caller re-acquiring a key it already
/// holds. Cycles across different keys are not detected.
///
/// Cloning is cheap and every clone shares the same lock table.
#[derive(Clone)]
pub struct LockManager {
    locks: Arc<DashMap<String, LockEntry>>,
    config: LockConfig,
    metrics: Arc<LockMetrics>,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self::with_metrics(config, Arc::new(LockMetrics::default()))
    }

    pub fn with_metrics(config: LockConfig, metrics: Arc<LockMetrics>) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquires `key` for `owner`, polling with backoff for at most `max_wait`.
    ///
    /// Returns `None` on timeout, or immediately if `owner` already holds a
    /// live lease on `key`. Neither case is an error.
    pub async fn acquire(
        &self,
        key: &str,
        owner: &LockOwner,
        lease: Duration,
        max_wait: Duration,
    ) -> Option<LockToken> {
        let started = Instant::now();
        let deadline = deadline_after(started, max_wait);
        let mut attempt: u32 = 0;

        loop {
            if self.holds(key, owner) {
                self.metrics.record_reentrant_rejection();
                tracing::warn!(
                    key = %key,
                    owner = %owner,
                    "Re-entrant lock attempt by current holder, refusing"
                );
                return None;
            }

            let token = LockToken::generate();
            if self.try_acquire(key, owner, &token, lease) {
                self.metrics
                    .record_acquired(started.elapsed().as_micros() as u64);
                return Some(token);
            }

            let now = Instant::now();
            if now >= deadline {
                self.metrics.record_timeout();
                tracing::debug!(
                    key = %key,
                    owner = %owner,
                    attempts = attempt + 1,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Lock acquisition timed out"
                );
                return None;
            }

            let delay = self.config.backoff_delay(attempt).min(deadline - now);
            tracing::trace!(key = %key, attempt, delay = ?delay, "Lock held, backing off");
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// One non-blocking attempt to install a lease for `token`.
    ///
    /// Succeeds only when no live lease exists for `key`. An expired lease is
    /// treated as absent and replaced. The check and the insert happen under
    /// the map shard's write lock, so concurrent callers cannot both win.
    pub fn try_acquire(
        &self,
        key: &str,
        owner: &LockOwner,
        token: &LockToken,
        lease: Duration,
    ) -> bool {
        let now = Instant::now();
        let entry = LockEntry {
            token: token.clone(),
            owner: owner.clone(),
            acquired_at: now,
            expires_at: deadline_after(now, lease),
            renew_count: 0,
        };

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return false;
                }
                tracing::debug!(
                    key = %key,
                    previous_owner = %occupied.get().owner,
                    owner = %owner,
                    "Taking over expired lock"
                );
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        tracing::debug!(
            key = %key,
            owner = %owner,
            lease_ms = lease.as_millis() as u64,
            "Lock acquired"
        );
        true
    }

    /// Releases `key` if and only if it is held by `token`.
    ///
    /// A mismatched or missing lock returns false and changes nothing. This
    /// usually means the lease expired and someone else took the key.
    pub fn release(&self, key: &str, token: &LockToken) -> bool {
        match self.locks.remove_if(key, |_, entry| entry.token == *token) {
            Some((_, entry)) => {
                self.metrics.record_released();
                tracing::debug!(
                    key = %key,
                    owner = %entry.owner,
                    held_ms = entry.acquired_at.elapsed().as_millis() as u64,
                    "Lock released"
                );
                true
            }
            None => {
                self.metrics.record_token_mismatch();
                tracing::warn!(key = %key, "Release with stale or foreign token ignored");
                false
            }
        }
    }

    /// Extends the lease on `key` to `now + extension` if `token` still holds it.
    pub fn renew(&self, key: &str, token: &LockToken, extension: Duration) -> bool {
        let now = Instant::now();
        if let Some(mut entry) = self.locks.get_mut(key) {
            if entry.token == *token && !entry.is_expired(now) {
                entry.expires_at = deadline_after(now, extension);
                entry.renew_count += 1;
                self.metrics.record_renewal();
                tracing::trace!(
                    key = %key,
                    renew_count = entry.renew_count,
                    "Lock renewed"
                );
                return true;
            }
        }
        self.metrics.record_token_mismatch();
        tracing::warn!(key = %key, "Renew with stale or foreign token ignored");
        false
    }

    /// Returns true if `owner` currently holds a live lease on `key`.
    pub fn holds(&self, key: &str, owner: &LockOwner) -> bool {
        let now = Instant::now();
        self.locks
            .get(key)
            .map(|entry| entry.owner == *owner && !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Returns true if any live lease exists for `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.locks
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Runs `f` while holding `key`.
    ///
    /// The lease is released on every exit path, including errors, panics and
    /// cancellation of the returned future. If acquisition times out or `f`
    /// fails, the whole acquire-then-run cycle is retried up to
    /// `options.retries` attempts in total, sleeping `retry_delay * attempt`
    /// in between.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        key: &str,
        owner: &LockOwner,
        options: WithLockOptions,
        mut f: F,
    ) -> Result<T, LockError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = options.retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self
                .acquire(key, owner, options.lease, options.max_wait)
                .await
            {
                Some(token) => {
                    let _held = HeldLock::new(self, key, token, &options);
                    match f().await {
                        Ok(value) => return Ok(value),
                        Err(e) => {
                            tracing::warn!(
                                key = %key,
                                owner = %owner,
                                attempt,
                                error = %e,
                                "Operation under lock failed"
                            );
                            last_error = Some(e);
                        }
                    }
                }
                None => {
                    tracing::debug!(key = %key, owner = %owner, attempt, "Lock unavailable");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_pause(attempt)).await;
            }
        }

        match last_error {
            Some(error) => Err(LockError::Operation {
                key: key.to_string(),
                error,
            }),
            None => Err(LockError::Unavailable {
                key: key.to_string(),
                attempts,
            }),
        }
    }

    /// Removes every entry whose lease has elapsed. Returns the number removed.
    pub fn cleanup_expired_locks(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        self.locks.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.metrics.record_swept(removed as u64);
            tracing::debug!(removed, "Swept expired locks");
        }
        removed
    }

    /// Snapshot of the lock table and lifetime counters.
    pub fn stats(&self) -> LockStats {
        use std::sync::atomic::Ordering;

        let now = Instant::now();
        let mut locks: Vec<LockInfo> = self
            .locks
            .iter()
            .map(|item| {
                let entry = item.value();
                LockInfo {
                    key: item.key().clone(),
                    owner: entry.owner.clone(),
                    held_for_ms: now.saturating_duration_since(entry.acquired_at).as_millis()
                        as u64,
                    expires_in_ms: entry.expires_at.saturating_duration_since(now).as_millis()
                        as u64,
                    expired: entry.is_expired(now),
                    renew_count: entry.renew_count,
                }
            })
            .collect();
        locks.sort_by(|a, b| a.key.cmp(&b.key));

        let expired_locks = locks.iter().filter(|l| l.expired).count();
        let m = &self.metrics;
        LockStats {
            active_locks: locks.len() - expired_locks,
            expired_locks,
            locks,
            acquired_total: m.acquired_total.load(Ordering::Relaxed),
            released_total: m.released_total.load(Ordering::Relaxed),
            timeouts_total: m.timeouts_total.load(Ordering::Relaxed),
            reentrant_rejections_total: m.reentrant_rejections_total.load(Ordering::Relaxed),
            token_mismatches_total: m.token_mismatches_total.load(Ordering::Relaxed),
            renewals_total: m.renewals_total.load(Ordering::Relaxed),
            expired_swept_total: m.expired_swept_total.load(Ordering::Relaxed),
        }
    }

    /// Emergency override: drops every lease regardless of holder.
    pub fn force_release_all(&self) -> usize {
        let count = self.locks.len();
        self.locks.clear();
        self.metrics.record_forced_release(count as u64);
        tracing::warn!(count, "Force-released all locks");
        count
    }
}

/// Longest lease or wait honored; larger durations are clamped to it.
pub const MAX_LEASE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[inline]
fn deadline_after(start: Instant, duration: Duration) -> Instant {
    start + duration.min(MAX_LEASE)
}

/// Releases a `with_lock` lease when dropped and stops its renewal task.
struct HeldLock<'a> {
    manager: &'a LockManager,
    key: String,
    token: LockToken,
    renewer: Option<JoinHandle<()>>,
}

impl<'a> HeldLock<'a> {
    fn new(
        manager: &'a LockManager,
        key: &str,
        token: LockToken,
        options: &WithLockOptions,
    ) -> Self {
        let renewer = options
            .auto_renew
            .then(|| spawn_renewer(manager.clone(), key.to_string(), token.clone(), options.lease));
        Self {
            manager,
            key: key.to_string(),
            token,
            renewer,
        }
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if let Some(renewer) = self.renewer.take() {
            renewer.abort();
        }
        self.manager.release(&self.key, &self.token);
    }
}

fn spawn_renewer(
    manager: LockManager,
    key: String,
    token: LockToken,
    lease: Duration,
) -> JoinHandle<()> {
    let period = (lease / 2).max(Duration::from_millis(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if !manager.renew(&key, &token, lease) {
                tracing::warn!(key = %key, "Lease lost during critical section, stopping renewal");
                break;
            }
        }
    })
}
