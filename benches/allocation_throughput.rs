//! Benchmarks for order identifier allocation and lock traffic.
//!
//! Run with: cargo bench
//! View results in: target/criterion/report/index.html

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rxcoord::contracts::{LockOwner, LockToken};
use rxcoord::lock::{LockConfig, LockManager};
use rxcoord::metrics::SequenceMetrics;
use rxcoord::orders::{parse_order_id, OrderIdService, MAX_SEQUENCE};
use rxcoord::storage::{RocksDbSequenceStore, TransactionConfig, TransactionManager};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn create_service() -> (OrderIdService, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksDbSequenceStore::open(dir.path()).unwrap());
    let service = OrderIdService::new(
        TransactionManager::new(store, TransactionConfig::default()),
        Arc::new(SequenceMetrics::default()),
    );
    (service, dir)
}

/// Each date holds at most `MAX_SEQUENCE` identifiers, so long runs roll forward.
fn date_for(n: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1)
        .unwrap()
        .checked_add_days(Days::new(n / MAX_SEQUENCE))
        .unwrap()
}

// =============================================================================
// Allocation Benchmarks
// =============================================================================

fn bench_allocate_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, _dir) = create_service();
    let mut counter = 0u64;

    c.bench_function("allocate_order_id", |b| {
        b.iter(|| {
            let date = date_for(counter);
            counter += 1;
            rt.block_on(service.generate_order_id_on(black_box(date)))
                .unwrap()
        });
    });
}

fn bench_allocate_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_concurrent");
    let rt = Runtime::new().unwrap();

    for tasks in [2usize, 8, 32].iter() {
        let (service, _dir) = create_service();
        let service = Arc::new(service);
        let mut round = 0u64;

        group.throughput(Throughput::Elements(*tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), tasks, |b, &tasks| {
            b.iter(|| {
                // One fresh date per round keeps every round well under the daily cap
                let date = date_for(round * MAX_SEQUENCE);
                round += 1;
                rt.block_on(async {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let service = Arc::clone(&service);
                            tokio::spawn(async move { service.generate_order_id_on(date).await })
                        })
                        .collect();
                    for h in handles {
                        h.await.unwrap().unwrap();
                    }
                })
            });
        });
    }

    group.finish();
}

// =============================================================================
// Lock and Parsing Benchmarks
// =============================================================================

fn bench_lock_uncontended(c: &mut Criterion) {
    let locks = LockManager::new(LockConfig::default());
    let owner = LockOwner::new("bench");
    let lease = Duration::from_secs(30);

    c.bench_function("lock_try_acquire_release", |b| {
        b.iter(|| {
            let token = LockToken::generate();
            let key = black_box("order_update_RX250625-001");
            assert!(locks.try_acquire(key, &owner, &token, lease));
            assert!(locks.release(key, &token));
        });
    });
}

fn bench_parse_order_id(c: &mut Criterion) {
    c.bench_function("parse_order_id", |b| {
        b.iter(|| parse_order_id(black_box("RX250625-042")).unwrap());
    });
}

criterion_group!(
    benches,
    bench_allocate_single,
    bench_allocate_concurrent,
    bench_lock_uncontended,
    bench_parse_order_id
);
criterion_main!(benches);
