//! RocksDB storage with pessimistic transactions
//!
//! All engine records live in one `TransactionDB`. Row-level exclusion comes
//! from `get_for_update`, which holds the key lock until the transaction
//! commits or is dropped. That lock is the only synchronization point the
//! settlement path relies on.

use crate::{
    config::StorageConfig,
    errors::{StorageError, WagerError, WagerResult},
};
use rocksdb::{Direction, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions};
use serde::{de::DeserializeOwned, Serialize};
use std::{path::Path, sync::Arc};

/// Transaction handle bound to the engine database
pub type WagerTxn<'a> = Transaction<'a, TransactionDB>;

#[derive(Clone)]
pub struct WagerStorage {
    db: Arc<TransactionDB>,
}

impl WagerStorage {
    pub fn open(config: &StorageConfig) -> WagerResult<Self> {
        if config.clear_on_start && Path::new(&config.data_dir).exists() {
            tracing::warn!(data_dir = %config.data_dir, "Clearing storage on start");
            std::fs::remove_dir_all(&config.data_dir)
                .map_err(|e| StorageError::OpenFailed(format!("{}: {}", config.data_dir, e)))?;
        }
        Self::open_path(&config.data_dir, config.lock_timeout_ms)
    }

    pub fn open_path<P: AsRef<Path>>(path: P, lock_timeout_ms: u64) -> WagerResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms as i64);

        let db = TransactionDB::open(&opts, &txn_opts, path)
            .map_err(|e| StorageError::OpenFailed(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a pessimistic transaction. Dropping it without `commit` rolls back.
    pub fn transaction(&self) -> WagerTxn<'_> {
        self.db.transaction()
    }

    /// Latest committed value, no lock taken
    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> WagerResult<Option<T>> {
        let bytes = self
            .db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        decode(key, bytes)
    }

    pub fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> WagerResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db
            .put(key, bytes)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Key/value pairs whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8], limit: usize) -> WagerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}

/// Read `key` inside `txn`, taking an exclusive lock on it
pub fn get_for_update_json<T: DeserializeOwned>(txn: &WagerTxn<'_>, key: &[u8]) -> WagerResult<Option<T>> {
    let bytes = txn.get_for_update(key, true).map_err(WagerError::from)?;
    decode(key, bytes)
}

pub fn put_json<T: Serialize>(txn: &WagerTxn<'_>, key: &[u8], value: &T) -> WagerResult<()> {
    let bytes = serde_json::to_vec(value)?;
    txn.put(key, bytes).map_err(WagerError::from)
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: Option<Vec<u8>>) -> WagerResult<Option<T>> {
    match bytes {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            StorageError::CorruptedData(format!(
                "Failed to decode {}: {}",
                String::from_utf8_lossy(key),
                e
            ))
            .into()
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        value: u64,
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let dir = TempDir::new().unwrap();
        let storage = WagerStorage::open_path(dir.path(), 500).unwrap();

        let txn = storage.transaction();
        put_json(&txn, b"row:1", &Row { value: 7 }).unwrap();
        txn.commit().unwrap();

        {
            let txn = storage.transaction();
            put_json(&txn, b"row:1", &Row { value: 99 }).unwrap();
            // dropped without commit
        }

        let row: Option<Row> = storage.get_json(b"row:1").unwrap();
        assert_eq!(row, Some(Row { value: 7 }));
    }

    #[test]
    fn test_scan_prefix_stops_at_prefix_boundary() {
        let dir = TempDir::new().unwrap();
        let storage = WagerStorage::open_path(dir.path(), 500).unwrap();

        storage.put_json(b"a:1", &Row { value: 1 }).unwrap();
        storage.put_json(b"a:2", &Row { value: 2 }).unwrap();
        storage.put_json(b"b:1", &Row { value: 3 }).unwrap();

        let rows = storage.scan_prefix(b"a:", 10).unwrap();
        assert_eq!(rows.len(), 2);

        let limited = storage.scan_prefix(b"a:", 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_lock_contention_times_out() {
        let dir = TempDir::new().unwrap();
        let storage = WagerStorage::open_path(dir.path(), 50).unwrap();
        storage.put_json(b"row:1", &Row { value: 1 }).unwrap();

        let holder = storage.transaction();
        let _: Option<Row> = get_for_update_json(&holder, b"row:1").unwrap();

        let contender = storage.transaction();
        let result: WagerResult<Option<Row>> = get_for_update_json(&contender, b"row:1");
        assert!(matches!(result, Err(WagerError::Contention(_))));
    }
}
