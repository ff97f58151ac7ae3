//! Metrics registry for the lock manager and order identifier allocation.
//!
//! All counters are lock-free atomics so recording never contends with the
//! critical sections being measured.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Histogram;

/// Central registry for all rxcoord observability metrics.
#[derive(Default)]
pub struct MetricsRegistry {
    /// Lock manager metrics
    pub locks: Arc<LockMetrics>,
    /// Order identifier allocation metrics
    pub sequences: Arc<SequenceMetrics>,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all metric categories initialized.
    pub fn new() -> Self {
        Self {
            locks: Arc::new(LockMetrics::default()),
            sequences: Arc::new(SequenceMetrics::default()),
        }
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);
        output.push_str(&self.locks.format_prometheus());
        output.push_str(&self.sequences.format_prometheus());
        output
    }
}

fn write_counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} counter", name);
    let _ = writeln!(output, "{} {}", name, value);
    output.push('\n');
}

/// Metrics for named-lock traffic.
#[derive(Default)]
pub struct LockMetrics {
    pub acquired_total: AtomicU64,
    pub released_total: AtomicU64,
    /// `acquire` calls that ran out of `max_wait`
    pub timeouts_total: AtomicU64,
    /// `acquire` calls refused because the caller already held the key
    pub reentrant_rejections_total: AtomicU64,
    /// `release`/`renew` calls carrying a stale or foreign token
    pub token_mismatches_total: AtomicU64,
    pub renewals_total: AtomicU64,
    pub expired_swept_total: AtomicU64,
    pub forced_releases_total: AtomicU64,
    /// Time spent in `acquire` before success, in microseconds
    pub wait_duration_us: Histogram,
}

impl LockMetrics {
    #[inline]
    pub fn record_acquired(&self, waited_us: u64) {
        self.acquired_total.fetch_add(1, Ordering::Relaxed);
        self.wait_duration_us.observe(waited_us);
    }

    #[inline]
    pub fn record_released(&self) {
        self.released_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reentrant_rejection(&self) {
        self.reentrant_rejections_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_token_mismatch(&self) {
        self.token_mismatches_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_renewal(&self) {
        self.renewals_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_swept(&self, count: u64) {
        self.expired_swept_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_forced_release(&self, count: u64) {
        self.forced_releases_total.fetch_add(count, Ordering::Relaxed);
    }

    /// Formats lock metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        write_counter(
            &mut output,
            "rxcoord_lock_acquired_total",
            "Total successful lock acquisitions",
            self.acquired_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_released_total",
            "Total locks released by their holder",
            self.released_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_timeouts_total",
            "Total acquisitions that gave up after max wait",
            self.timeouts_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_reentrant_rejections_total",
            "Total acquisitions refused because the caller already held the key",
            self.reentrant_rejections_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_token_mismatches_total",
            "Total release or renew calls with a stale or foreign token",
            self.token_mismatches_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_renewals_total",
            "Total lease renewals",
            self.renewals_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_expired_swept_total",
            "Total expired leases removed by the sweeper",
            self.expired_swept_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_lock_forced_releases_total",
            "Total locks dropped by emergency force release",
            self.forced_releases_total.load(Ordering::Relaxed),
        );

        output.push_str(&self.wait_duration_us.format_prometheus(
            "rxcoord_lock_wait_duration_us",
            "Histogram of time spent waiting for a lock in microseconds",
        ));
        output.push('\n');

        output
    }
}

/// Metrics for order identifier allocation.
#[derive(Default)]
pub struct SequenceMetrics {
    pub allocated_total: AtomicU64,
    pub allocation_failures_total: AtomicU64,
    /// Transactions re-run after write contention
    pub contention_retries_total: AtomicU64,
    pub resets_total: AtomicU64,
    /// End-to-end allocation latency including retries, in microseconds
    pub allocation_duration_us: Histogram,
}

impl SequenceMetrics {
    #[inline]
    pub fn record_allocation(&self, duration_us: u64) {
        self.allocated_total.fetch_add(1, Ordering::Relaxed);
        self.allocation_duration_us.observe(duration_us);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.allocation_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_contention_retry(&self) {
        self.contention_retries_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reset(&self) {
        self.resets_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn contention_retries(&self) -> u64 {
        self.contention_retries_total.load(Ordering::Relaxed)
    }

    /// Formats allocation metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(1024);

        write_counter(
            &mut output,
            "rxcoord_order_ids_allocated_total",
            "Total order identifiers allocated",
            self.allocated_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_order_id_failures_total",
            "Total order identifier allocations that failed",
            self.allocation_failures_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_sequence_contention_retries_total",
            "Total sequence transactions retried after write contention",
            self.contention_retries_total.load(Ordering::Relaxed),
        );
        write_counter(
            &mut output,
            "rxcoord_sequence_resets_total",
            "Total administrative sequence resets",
            self.resets_total.load(Ordering::Relaxed),
        );

        output.push_str(&self.allocation_duration_us.format_prometheus(
            "rxcoord_order_id_allocation_duration_us",
            "Histogram of order identifier allocation latency in microseconds",
        ));
        output.push('\n');

        output
    }
}
