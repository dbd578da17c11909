//! RocksDB backend.
//!
//! All operations are synchronous blocking I/O. Callers in async contexts
//! should use `spawn_blocking` if needed to avoid blocking the runtime.

use crate::db::{join_key, Database, StoreError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

/// RocksDB-based storage for production use.
pub struct RocksDb {
    db: Arc<DB>,
}

impl RocksDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .take_while(|item| match item {
                Ok((key, _)) => key.starts_with(prefix),
                Err(_) => false,
            })
            .filter_map(|item| item.ok().map(|(k, v)| (k.to_vec(), v.to_vec())))
            .collect()
    }
}

impl Database for RocksDb {
    fn set(&self, prefix: &[u8], key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(join_key(prefix, key), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get(&self, prefix: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(join_key(prefix, key))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_all(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .iter_prefix(prefix)
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_vec(), v))
            .collect())
    }

    fn remove_all(&self, prefix: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for (key, _) in self.iter_prefix(prefix) {
            batch.delete(key);
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_rocksdb() {
        let dir = tempfile::tempdir().unwrap();
        let db = RocksDb::open(dir.path()).unwrap();

        db.set(b"share-", b"pk1", b"value1").unwrap();
        db.set(b"share-", b"pk2", b"value2").unwrap();
        db.set(b"sync-offset", b"", b"42").unwrap();

        assert_eq!(db.get(b"share-", b"pk1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.get_all(b"share-").unwrap().len(), 2);

        db.remove_all(b"share-").unwrap();
        assert!(db.get_all(b"share-").unwrap().is_empty());
        assert_eq!(db.get(b"sync-offset", b"").unwrap(), Some(b"42".to_vec()));
    }
}
