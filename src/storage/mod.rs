mod rocksdb;
mod transaction;

pub use rocksdb::{RocksDbSequenceStore, StoreConfig};
pub use transaction::{TransactionConfig, TransactionManager};
