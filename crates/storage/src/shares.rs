//! Validator share store.

use crate::db::{Database, StoreError};
use parking_lot::RwLock;
use ssv_types::{Share, ShareOptions, ValidatorMetadata};
use std::sync::Arc;
use tracing::{error, info};

const PREFIX: &[u8] = b"share-";

/// Durable map from validator public key to [`Share`].
///
/// Writes serialize the whole record under a single lock; reads are shared.
pub struct ShareStore {
    db: Arc<dyn Database>,
    lock: RwLock<()>,
}

impl ShareStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            lock: RwLock::new(()),
        }
    }

    /// Persist a share, keyed by its validator public key.
    pub fn save(&self, share: &Share) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.save_unlocked(share)
    }

    fn save_unlocked(&self, share: &Share) -> Result<(), StoreError> {
        let value = share.serialize()?;
        self.db.set(PREFIX, &share.validator_pk.to_bytes(), &value)
    }

    /// Fetch a share by validator public key bytes.
    pub fn get(&self, validator_pk: &[u8]) -> Result<Option<Share>, StoreError> {
        let _guard = self.lock.read();
        self.get_unlocked(validator_pk)
    }

    fn get_unlocked(&self, validator_pk: &[u8]) -> Result<Option<Share>, StoreError> {
        match self.db.get(PREFIX, validator_pk)? {
            Some(value) => Ok(Some(Share::deserialize(validator_pk, &value)?)),
            None => Ok(None),
        }
    }

    /// All stored shares.
    pub fn list(&self) -> Result<Vec<Share>, StoreError> {
        let _guard = self.lock.read();
        let mut shares = Vec::new();
        for (key, value) in self.db.get_all(PREFIX)? {
            shares.push(Share::deserialize(&key, &value)?);
        }
        Ok(shares)
    }

    /// Remove every stored share.
    pub fn clean(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.db.remove_all(PREFIX)
    }

    /// Replace the metadata of the share stored for `validator_pk_hex`.
    /// A missing share is not an error; registry sync may still be behind.
    pub fn update_metadata(
        &self,
        validator_pk_hex: &str,
        metadata: ValidatorMetadata,
    ) -> Result<(), StoreError> {
        let key =
            hex::decode(validator_pk_hex).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let _guard = self.lock.write();
        let Some(mut share) = self.get_unlocked(&key)? else {
            return Ok(());
        };
        share.metadata = Some(metadata);
        self.save_unlocked(&share)
    }

    /// Load shares from config entries and persist them. Returns the hex
    /// public keys of the validators that were added.
    pub fn load_multiple_from_config(&self, items: &[ShareOptions]) -> Vec<String> {
        let mut added = Vec::new();
        if items.is_empty() {
            return added;
        }
        info!(count = items.len(), "loading validator shares from config");
        for opts in items {
            match self.load_from_config(opts) {
                Ok(pk) => added.push(pk),
                Err(e) => error!(error = %e, "failed to load validator share from config"),
            }
        }
        info!(pubkeys = ?added, "loaded validators from config");
        added
    }

    /// Load a single share from a config entry and persist it.
    pub fn load_from_config(&self, opts: &ShareOptions) -> Result<String, StoreError> {
        let share = opts.to_share()?;
        let pk = share.validator_pk.to_hex();
        self.save(&share)?;
        Ok(pk)
    }
}
