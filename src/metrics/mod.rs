//! Observability metrics for rxcoord.
//!
//! Counters and latency histograms for lock traffic and order identifier
//! allocation, exported in Prometheus text format.

pub mod histogram;
pub mod registry;

pub use histogram::{Histogram, HistogramSnapshot, BUCKET_BOUNDS_US};
pub use registry::{LockMetrics, MetricsRegistry, SequenceMetrics};
