//! Decided message store.
//!
//! Holds the decided certificate for every `(lambda, sequence)` a node has
//! seen, plus the highest known decided sequence per lambda and the node's
//! own last change-round message (served to lagging peers for
//! justification replay).

use crate::db::{Database, StoreError};
use parking_lot::RwLock;
use ssv_types::{Lambda, SignedMessage};
use std::sync::Arc;

const DECIDED_PREFIX: &[u8] = b"decided-";
const HIGHEST_PREFIX: &[u8] = b"highest-known-";
const CHANGE_ROUND_PREFIX: &[u8] = b"last-change-round-";

fn decided_key(lambda: &Lambda, seq_number: u64) -> Vec<u8> {
    let mut key = lambda.to_string().into_bytes();
    key.push(b'-');
    key.extend_from_slice(&seq_number.to_be_bytes());
    key
}

/// Store of decided certificates, keyed by lambda and sequence.
pub struct DecidedStore {
    db: Arc<dyn Database>,
    lock: RwLock<()>,
}

impl DecidedStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            lock: RwLock::new(()),
        }
    }

    fn encode(msg: &SignedMessage) -> Result<Vec<u8>, StoreError> {
        bincode::serialize(msg).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<SignedMessage, StoreError> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Persist a decided certificate under its `(lambda, seq)` coordinates.
    pub fn save_decided(&self, msg: &SignedMessage) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        let key = decided_key(&msg.message.lambda, msg.message.seq_number);
        self.db.set(DECIDED_PREFIX, &key, &Self::encode(msg)?)
    }

    pub fn get_decided(
        &self,
        lambda: &Lambda,
        seq_number: u64,
    ) -> Result<Option<SignedMessage>, StoreError> {
        let _guard = self.lock.read();
        match self.db.get(DECIDED_PREFIX, &decided_key(lambda, seq_number))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decided certificates for `from..=to`, in ascending sequence order.
    /// Missing sequences are skipped.
    pub fn get_decided_range(
        &self,
        lambda: &Lambda,
        from: u64,
        to: u64,
    ) -> Result<Vec<SignedMessage>, StoreError> {
        let _guard = self.lock.read();
        let mut out = Vec::new();
        for seq in from..=to {
            if let Some(bytes) = self.db.get(DECIDED_PREFIX, &decided_key(lambda, seq))? {
                out.push(Self::decode(&bytes)?);
            }
        }
        Ok(out)
    }

    /// Record the highest known decided certificate for a lambda.
    pub fn save_highest(&self, msg: &SignedMessage) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        let key = msg.message.lambda.to_string().into_bytes();
        self.db.set(HIGHEST_PREFIX, &key, &Self::encode(msg)?)
    }

    pub fn get_highest(&self, lambda: &Lambda) -> Result<Option<SignedMessage>, StoreError> {
        let _guard = self.lock.read();
        match self.db.get(HIGHEST_PREFIX, lambda.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record this node's latest broadcast change-round message.
    pub fn save_last_change_round(&self, msg: &SignedMessage) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        let key = msg.message.lambda.to_string().into_bytes();
        self.db.set(CHANGE_ROUND_PREFIX, &key, &Self::encode(msg)?)
    }

    pub fn get_last_change_round(
        &self,
        lambda: &Lambda,
    ) -> Result<Option<SignedMessage>, StoreError> {
        let _guard = self.lock.read();
        match self
            .db
            .get(CHANGE_ROUND_PREFIX, lambda.to_string().as_bytes())?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemDb;
    use ssv_types::test_utils::{signed_by, test_keys, test_message};
    use ssv_types::MessageType;

    fn store() -> DecidedStore {
        DecidedStore::new(Arc::new(MemDb::new()))
    }

    fn decided_at(seq: u64, lambda: &Lambda) -> SignedMessage {
        let kps = test_keys(1);
        let msg = test_message(MessageType::Commit, 1, lambda, seq, vec![0xAB]);
        signed_by(&kps[0], 1, &msg)
    }

    #[test]
    fn range_reads_back_in_order() {
        let store = store();
        let lambda = Lambda::from_slice(&[1, 2, 3, 4]);

        for seq in [3u64, 1, 2] {
            store.save_decided(&decided_at(seq, &lambda)).unwrap();
        }

        let range = store.get_decided_range(&lambda, 1, 3).unwrap();
        let seqs: Vec<u64> = range.iter().map(|m| m.message.seq_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        assert!(store.get_decided(&lambda, 4).unwrap().is_none());
    }

    #[test]
    fn lambdas_do_not_collide() {
        let store = store();
        let a = Lambda::from_slice(&[1]);
        let b = Lambda::from_slice(&[2]);

        store.save_decided(&decided_at(1, &a)).unwrap();
        assert!(store.get_decided(&b, 1).unwrap().is_none());
    }

    #[test]
    fn highest_and_change_round_roundtrip() {
        let store = store();
        let lambda = Lambda::from_slice(&[9]);

        assert!(store.get_highest(&lambda).unwrap().is_none());
        let msg = decided_at(12, &lambda);
        store.save_highest(&msg).unwrap();
        assert_eq!(
            store.get_highest(&lambda).unwrap().unwrap().message.seq_number,
            12
        );

        let kps = test_keys(1);
        let cr = signed_by(
            &kps[0],
            1,
            &test_message(MessageType::ChangeRound, 3, &lambda, 12, Vec::new()),
        );
        store.save_last_change_round(&cr).unwrap();
        assert_eq!(
            store
                .get_last_change_round(&lambda)
                .unwrap()
                .unwrap()
                .message
                .round,
            3
        );
    }
}
