//! Registry sync offset store.

use crate::db::{Database, StoreError};
use std::sync::Arc;

const PREFIX: &[u8] = b"sync-offset";
const KEY: &[u8] = b"";

/// Persists the last contract block number whose events were durably
/// processed, so restarts resume without replaying the whole history.
pub struct SyncOffsetStore {
    db: Arc<dyn Database>,
}

impl SyncOffsetStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Persist the offset (a block number).
    pub fn save_offset(&self, offset: u64) -> Result<(), StoreError> {
        self.db.set(PREFIX, KEY, &offset.to_be_bytes())
    }

    /// The stored offset, or `None` when nothing was persisted yet.
    pub fn get_offset(&self) -> Result<Option<u64>, StoreError> {
        match self.db.get(PREFIX, KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Serialization("bad offset encoding".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Remove the stored offset.
    pub fn clean(&self) -> Result<(), StoreError> {
        self.db.remove_all(PREFIX)
    }
}
