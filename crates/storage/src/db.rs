//! Generic key-value backend.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Share(#[from] ssv_types::ShareError),
}

/// Minimal prefix-scoped key-value interface.
///
/// Prefixes give each store its own namespace; the full storage key is the
/// prefix joined with the logical key.
pub trait Database: Send + Sync {
    fn set(&self, prefix: &[u8], key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, prefix: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    /// All `(key, value)` pairs under a prefix, with the prefix stripped
    /// from the returned keys, in ascending key order.
    fn get_all(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
    fn remove_all(&self, prefix: &[u8]) -> Result<(), StoreError>;
}

pub(crate) fn full_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + key.len());
    k.extend_from_slice(prefix);
    k.extend_from_slice(key);
    k
}

pub(crate) use full_key as join_key;

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemDb {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemDb {
    fn set(&self, prefix: &[u8], key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.map.write().insert(full_key(prefix, key), value.to_vec());
        Ok(())
    }

    fn get(&self, prefix: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().get(&full_key(prefix, key)).cloned())
    }

    fn get_all(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k[prefix.len()..].to_vec(), v.clone()))
            .collect())
    }

    fn remove_all(&self, prefix: &[u8]) -> Result<(), StoreError> {
        self.map
            .write()
            .retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
