use std::path::Path;

use rocksdb::{ErrorKind, Options, Transaction, TransactionDB, TransactionDBOptions};

use crate::contracts::{
    DateKey, SequenceRow, SequenceStore, SequenceTransaction, StorageError,
};

/// Key prefix for sequence counter rows
const SEQUENCE_PREFIX: &str = "seq";
/// Encoded row: sequence (u64) + created_at_ms (i64) + updated_at_ms (i64), big-endian
const ROW_LEN: usize = 24;

/// Configuration for the RocksDB sequence store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a transaction waits for a row lock before failing with contention.
    pub lock_timeout_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 1_000,
        }
    }
}

impl StoreConfig {
    /// Creates a StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RXCOORD_STORE_LOCK_TIMEOUT_MS`: Row lock wait in ms (default: 1000)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            lock_timeout_ms: std::env::var("RXCOORD_STORE_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &i64| *v > 0)
                .unwrap_or(default.lock_timeout_ms),
        }
    }
}

/// RocksDB-backed `order_sequences` table.
///
/// Uses a pessimistic `TransactionDB`: every mutating call locks the date row
/// exclusively for the rest of the transaction, and a writer that cannot get
/// the lock within `lock_timeout_ms` fails with `StorageError::Contention`.
pub struct RocksDbSequenceStore {
    db: TransactionDB,
}

impl RocksDbSequenceStore {
    /// Opens or creates a sequence store at the given path with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_config(path, &StoreConfig::default())
    }

    /// Opens or creates a sequence store at the given path.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // One small row per day: keep the memtable small
        opts.set_write_buffer_size(4 * 1024 * 1024);
        opts.set_wal_dir(path.join("wal"));

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let db = TransactionDB::open(&opts, &txn_opts, path).map_err(map_rocksdb_err)?;

        tracing::info!(
            path = %path.display(),
            lock_timeout_ms = config.lock_timeout_ms,
            "Opened sequence store"
        );

        Ok(Self { db })
    }

    /// Creates a row key.
    /// Format: seq:{YYYYMMDD}
    fn row_key(date: &DateKey) -> String {
        format!("{}:{}", SEQUENCE_PREFIX, date)
    }

    fn encode_row(sequence: u64, created_at_ms: i64, updated_at_ms: i64) -> [u8; ROW_LEN] {
        let mut buf = [0u8; ROW_LEN];
        buf[0..8].copy_from_slice(&sequence.to_be_bytes());
        buf[8..16].copy_from_slice(&created_at_ms.to_be_bytes());
        buf[16..24].copy_from_slice(&updated_at_ms.to_be_bytes());
        buf
    }

    fn decode_row(date: &DateKey, bytes: &[u8]) -> Result<SequenceRow, StorageError> {
        if bytes.len() != ROW_LEN {
            return Err(StorageError::Serialization(format!(
                "sequence row for {} has {} bytes, expected {}",
                date,
                bytes.len(),
                ROW_LEN
            )));
        }
        let field = |range: std::ops::Range<usize>| -> [u8; 8] {
            let mut out = [0u8; 8];
            out.copy_from_slice(&bytes[range]);
            out
        };
        Ok(SequenceRow {
            date: date.clone(),
            sequence: u64::from_be_bytes(field(0..8)),
            created_at_ms: i64::from_be_bytes(field(8..16)),
            updated_at_ms: i64::from_be_bytes(field(16..24)),
        })
    }
}

impl SequenceStore for RocksDbSequenceStore {
    fn begin(&self) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
        Ok(Box::new(RocksDbTransaction {
            txn: self.db.transaction(),
        }))
    }
}

/// A pessimistic transaction over the sequence table.
struct RocksDbTransaction<'db> {
    txn: Transaction<'db, TransactionDB>,
}

impl RocksDbTransaction<'_> {
    /// Reads a row while taking its exclusive lock.
    fn read_for_update(&self, date: &DateKey) -> Result<Option<SequenceRow>, StorageError> {
        let key = RocksDbSequenceStore::row_key(date);
        match self.txn.get_for_update(key.as_bytes(), true) {
            Ok(Some(bytes)) => Ok(Some(RocksDbSequenceStore::decode_row(date, &bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(map_rocksdb_err(e)),
        }
    }

    fn put_row(&self, date: &DateKey, row: [u8; ROW_LEN]) -> Result<(), StorageError> {
        let key = RocksDbSequenceStore::row_key(date);
        self.txn.put(key.as_bytes(), row).map_err(map_rocksdb_err)
    }
}

impl SequenceTransaction for RocksDbTransaction<'_> {
    fn insert_if_absent(&mut self, date: &DateKey) -> Result<bool, StorageError> {
        if self.read_for_update(date)?.is_some() {
            return Ok(false);
        }
        let now = now_ms();
        self.put_row(date, RocksDbSequenceStore::encode_row(0, now, now))?;
        tracing::debug!(date = %date, "Created sequence row");
        Ok(true)
    }

    fn increment_and_get(&mut self, date: &DateKey) -> Result<u64, StorageError> {
        let row = self
            .read_for_update(date)?
            .ok_or_else(|| StorageError::RowNotFound(date.to_string()))?;
        let next = row.sequence.checked_add(1).ok_or_else(|| {
            StorageError::InvariantViolation(format!("sequence overflow for {}", date))
        })?;
        self.put_row(
            date,
            RocksDbSequenceStore::encode_row(next, row.created_at_ms, now_ms()),
        )?;
        Ok(next)
    }

    fn read(&mut self, date: &DateKey) -> Result<Option<SequenceRow>, StorageError> {
        let key = RocksDbSequenceStore::row_key(date);
        match self.txn.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(RocksDbSequenceStore::decode_row(date, &bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(map_rocksdb_err(e)),
        }
    }

    fn write(&mut self, date: &DateKey, sequence: u64) -> Result<(), StorageError> {
        let now = now_ms();
        let created_at = self
            .read_for_update(date)?
            .map(|row| row.created_at_ms)
            .unwrap_or(now);
        self.put_row(
            date,
            RocksDbSequenceStore::encode_row(sequence, created_at, now),
        )
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.txn.commit().map_err(map_rocksdb_err)
    }

    fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.txn.rollback().map_err(map_rocksdb_err)
    }
}

/// Classifies engine errors: lock waits that gave up are contention, the rest are hard failures.
fn map_rocksdb_err(e: rocksdb::Error) -> StorageError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StorageError::Contention(e.to_string())
        }
        _ => StorageError::RocksDb(e.to_string()),
    }
}

#[inline]
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
