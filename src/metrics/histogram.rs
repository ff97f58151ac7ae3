//! Lock-free latency histogram with Prometheus exposition.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bounds of the histogram buckets, in microseconds.
///
/// Covers an uncontended lock grab (100μs) up to a lock wait or a retried
/// allocation that ran for several seconds.
pub const BUCKET_BOUNDS_US: [u64; 12] = [
    100,
    500,
    1_000,
    5_000,
    10_000,
    50_000,
    100_000,
    250_000,
    500_000,
    1_000_000,
    5_000_000,
    10_000_000,
];

const BUCKETS: usize = BUCKET_BOUNDS_US.len();

/// Point-in-time copy of a histogram. Bucket counts are cumulative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub sum: u64,
    pub count: u64,
    pub cumulative: [u64; BUCKETS],
}

/// Latency histogram over fixed microsecond buckets.
///
/// Each observation bumps exactly one slot (the first bucket whose bound it
/// fits under, or the overflow slot); cumulative counts are computed when a
/// snapshot is taken.
///
/// ```
/// use rxcoord::metrics::Histogram;
///
/// let histogram = Histogram::new();
/// histogram.observe(1_500); // 1.5ms lock wait
///
/// let snapshot = histogram.snapshot();
/// assert_eq!(snapshot.count, 1);
/// assert_eq!(snapshot.sum, 1_500);
/// ```
#[derive(Default)]
pub struct Histogram {
    sum: AtomicU64,
    count: AtomicU64,
    /// Per-bucket counts; the last slot holds values above every bound
    slots: [AtomicU64; BUCKETS + 1],
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation in microseconds.
    #[inline]
    pub fn observe(&self, value_us: u64) {
        let slot = BUCKET_BOUNDS_US.partition_point(|&bound| bound < value_us);
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = [0u64; BUCKETS];
        let mut running = 0;
        for (i, total) in cumulative.iter_mut().enumerate() {
            running += self.slots[i].load(Ordering::Relaxed);
            *total = running;
        }
        HistogramSnapshot {
            sum: self.sum.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            cumulative,
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Renders the histogram as a Prometheus `histogram` metric named `name`.
    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let snapshot = self.snapshot();
        let mut output = String::with_capacity(1024);

        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for (bound, total) in BUCKET_BOUNDS_US.iter().zip(snapshot.cumulative) {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, total);
        }
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, snapshot.count);
        let _ = writeln!(output, "{}_sum {}", name, snapshot.sum);
        let _ = writeln!(output, "{}_count {}", name, snapshot.count);

        output
    }
}
