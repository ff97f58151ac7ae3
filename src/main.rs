use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use rxcoord::contracts::{RxError, Sweeper};
use rxcoord::lock::{LockConfig, LockManager, LockSweeper};
use rxcoord::metrics::MetricsRegistry;
use rxcoord::orders::OrderIdService;
use rxcoord::storage::{RocksDbSequenceStore, StoreConfig, TransactionConfig, TransactionManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rxcoord=info".parse()?))
        .init();

    let count: usize = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 1,
    };

    // Sequence store (RocksDB)
    let data_dir = std::env::var("RXCOORD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let store = Arc::new(RocksDbSequenceStore::open_with_config(
        &data_dir,
        &StoreConfig::from_env(),
    )?);
    tracing::info!("Opened sequence store at {}", data_dir);

    let metrics = MetricsRegistry::new();
    let transactions = TransactionManager::new(store, TransactionConfig::from_env())
        .with_metrics(Arc::clone(&metrics.sequences));
    let ids = OrderIdService::new(transactions, Arc::clone(&metrics.sequences));

    let locks = LockManager::with_metrics(LockConfig::from_env(), Arc::clone(&metrics.locks));
    let sweeper = LockSweeper::new(locks.clone());
    sweeper.start().await?;

    let mut failed = None;
    for _ in 0..count {
        match ids.generate_order_id().await {
            Ok(order_id) => println!("{}", order_id),
            Err(e) => {
                failed = Some(e);
                break;
            }
        }
    }

    let stats = serde_json::to_string_pretty(&locks.stats())?;
    tracing::debug!(stats = %stats, "Lock table at shutdown");
    tracing::info!(
        current_sequence = ids.get_current_sequence(None)?,
        "Allocation finished"
    );
    eprint!("{}", metrics.format_prometheus());

    sweeper.stop().await?;

    match failed {
        Some(e) => Err(RxError::from(e).into()),
        None => Ok(()),
    }
}
