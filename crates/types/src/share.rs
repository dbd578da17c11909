//! Validator share model and threshold arithmetic.
//!
//! A `Share` is one operator's view of a validator: its own piece of the
//! Shamir-split signing key (absent on observer nodes) plus the full
//! operator committee with each member's share public key. Quorum sizes
//! derive from the committee size alone.

use crate::bls::{BlsPublicKey, BlsSecretKey, CryptoError};
use crate::identifiers::OperatorId;
use crate::message::{MessageError, SignedMessage};
use crate::metadata::ValidatorMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from share construction, lookup, and verification.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("public key for operator {0} not found")]
    UnknownSigner(OperatorId),
    #[error("committee is empty")]
    EmptyCommittee,
    #[error("node id {node_id} outside committee of size {committee_size}")]
    NodeIdOutOfRange { node_id: u64, committee_size: usize },
    #[error("share key does not match the committee entry for this operator")]
    ShareKeyMismatch,
    #[error("one or more required fields are missing (public_key, share_key, committee)")]
    MissingFields,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// A committee member as registered on the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub ibft_id: OperatorId,
    /// The member's share public key (48 bytes compressed).
    pub pubkey: Vec<u8>,
    /// Present only in test fixtures; operators never learn each other's keys.
    pub share_key: Option<Vec<u8>>,
}

/// Committee public keys resolved for a set of signer ids.
pub struct PubKeys(pub Vec<BlsPublicKey>);

impl PubKeys {
    /// Sum the keys into a single aggregate.
    pub fn aggregate(&self) -> Result<BlsPublicKey, CryptoError> {
        BlsPublicKey::aggregate(&self.0)
    }
}

/// One operator's share of a validator.
#[derive(Debug, Clone)]
pub struct Share {
    pub node_id: OperatorId,
    pub validator_pk: BlsPublicKey,
    /// This operator's secret share. `None` on observer nodes.
    pub share_key: Option<BlsSecretKey>,
    pub committee: BTreeMap<OperatorId, CommitteeMember>,
    pub metadata: Option<ValidatorMetadata>,
}

/// Storage form of a share. The validator public key is the storage key,
/// so it is not duplicated in the value.
#[derive(Serialize, Deserialize)]
struct SerializedShare {
    node_id: u64,
    share_key: Option<Vec<u8>>,
    committee: BTreeMap<u64, CommitteeMember>,
    metadata: Option<ValidatorMetadata>,
}

impl Share {
    /// Number of operators in the committee.
    pub fn committee_size(&self) -> usize {
        self.committee.len()
    }

    /// Minimum signers for a quorum (2F+1): `ceil(2n/3)`.
    pub fn threshold(&self) -> usize {
        let n = self.committee_size();
        (2 * n).div_ceil(3)
    }

    /// Minimum signers for a partial quorum (F+1): `ceil(n/3)`.
    pub fn partial_threshold(&self) -> usize {
        self.committee_size().div_ceil(3)
    }

    /// Resolve committee share public keys for the given signer ids, in order.
    pub fn pubkeys_by_ids(&self, ids: &[OperatorId]) -> Result<PubKeys, ShareError> {
        let mut pks = Vec::with_capacity(ids.len());
        for id in ids {
            let member = self
                .committee
                .get(id)
                .ok_or(ShareError::UnknownSigner(*id))?;
            pks.push(BlsPublicKey::from_bytes(&member.pubkey)?);
        }
        Ok(PubKeys(pks))
    }

    /// Verify a signed message against this share's committee.
    ///
    /// Every signer id must belong to the committee and the aggregated
    /// signature must verify over the message's signing root.
    pub fn verify_signed_message(&self, msg: &SignedMessage) -> Result<(), ShareError> {
        if msg.signer_ids.is_empty() {
            return Err(ShareError::Message(MessageError::NoSigners));
        }
        let pks = self.pubkeys_by_ids(&msg.signer_ids)?;
        msg.verify_aggregate(&pks.0)?;
        Ok(())
    }

    /// Serialize for storage. The caller keys the record by `validator_pk`.
    pub fn serialize(&self) -> Result<Vec<u8>, ShareError> {
        let value = SerializedShare {
            node_id: self.node_id.0,
            share_key: self.share_key.as_ref().map(|k| k.to_bytes().to_vec()),
            committee: self
                .committee
                .iter()
                .map(|(id, m)| (id.0, m.clone()))
                .collect(),
            metadata: self.metadata.clone(),
        };
        bincode::serialize(&value).map_err(|e| ShareError::Serialization(e.to_string()))
    }

    /// Rebuild a share from a storage key/value pair.
    pub fn deserialize(key: &[u8], value: &[u8]) -> Result<Self, ShareError> {
        let raw: SerializedShare =
            bincode::deserialize(value).map_err(|e| ShareError::Serialization(e.to_string()))?;
        let share_key = match raw.share_key {
            Some(bytes) if !bytes.is_empty() => Some(BlsSecretKey::from_bytes(&bytes)?),
            _ => None,
        };
        Ok(Share {
            node_id: OperatorId(raw.node_id),
            validator_pk: BlsPublicKey::from_bytes(key)?,
            share_key,
            committee: raw
                .committee
                .into_iter()
                .map(|(id, m)| (OperatorId(id), m))
                .collect(),
            metadata: raw.metadata,
        })
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// This operator's own committee entry.
    pub fn own_member(&self) -> Option<&CommitteeMember> {
        self.committee.get(&self.node_id)
    }
}

/// Config-file form of a share, hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareOptions {
    pub node_id: u64,
    /// Validator public key, hex.
    pub public_key: String,
    /// This operator's secret share, hex.
    pub share_key: String,
    /// Committee share public keys by operator id, hex.
    pub committee: BTreeMap<u64, String>,
}

impl ShareOptions {
    /// Validate and build a `Share`.
    ///
    /// Checks that the committee is non-empty, that `node_id` addresses a
    /// committee slot, and that the configured secret matches the committee
    /// entry registered for this operator.
    pub fn to_share(&self) -> Result<Share, ShareError> {
        if self.public_key.is_empty() || self.share_key.is_empty() || self.committee.is_empty() {
            return Err(ShareError::MissingFields);
        }
        if self.node_id == 0 || self.node_id > self.committee.len() as u64 {
            return Err(ShareError::NodeIdOutOfRange {
                node_id: self.node_id,
                committee_size: self.committee.len(),
            });
        }

        let pk_bytes = hex::decode(&self.public_key)
            .map_err(|e| ShareError::Serialization(e.to_string()))?;
        let validator_pk = BlsPublicKey::from_bytes(&pk_bytes)?;

        let sk_bytes =
            hex::decode(&self.share_key).map_err(|e| ShareError::Serialization(e.to_string()))?;
        let share_key = BlsSecretKey::from_bytes(&sk_bytes)?;

        let mut committee = BTreeMap::new();
        for (id, pk_hex) in &self.committee {
            let pubkey =
                hex::decode(pk_hex).map_err(|e| ShareError::Serialization(e.to_string()))?;
            if pubkey.is_empty() {
                return Err(ShareError::MissingFields);
            }
            committee.insert(
                OperatorId(*id),
                CommitteeMember {
                    ibft_id: OperatorId(*id),
                    pubkey,
                    share_key: None,
                },
            );
        }

        let own = committee
            .get(&OperatorId(self.node_id))
            .ok_or(ShareError::UnknownSigner(OperatorId(self.node_id)))?;
        if own.pubkey != share_key.public_key().to_bytes().to_vec() {
            return Err(ShareError::ShareKeyMismatch);
        }

        Ok(Share {
            node_id: OperatorId(self.node_id),
            validator_pk,
            share_key: Some(share_key),
            committee,
            metadata: None,
        })
    }
}
