//! Consensus message types and their canonical signing encoding.

use crate::bls::{BlsPublicKey, BlsSignature, CryptoError};
use crate::identifiers::{Lambda, OperatorId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Consensus message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    PrePrepare,
    Prepare,
    Commit,
    ChangeRound,
    Decided,
}

impl MessageType {
    /// Stable one-byte tag used in the signing encoding.
    pub fn tag(&self) -> u8 {
        match self {
            MessageType::PrePrepare => 0,
            MessageType::Prepare => 1,
            MessageType::Commit => 2,
            MessageType::ChangeRound => 3,
            MessageType::Decided => 4,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::PrePrepare => "pre-prepare",
            MessageType::Prepare => "prepare",
            MessageType::Commit => "commit",
            MessageType::ChangeRound => "change-round",
            MessageType::Decided => "decided",
        };
        write!(f, "{s}")
    }
}

/// Errors from message construction, aggregation, and verification.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("signing roots differ, cannot aggregate")]
    RootMismatch,
    #[error("overlapping signer ids, cannot aggregate")]
    OverlappingSigners,
    #[error("message carries no signers")]
    NoSigners,
    #[error("aggregated signature does not verify")]
    InvalidSignature,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// A consensus message before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub round: u64,
    pub lambda: Lambda,
    pub seq_number: u64,
    /// Opaque duty payload: the exact bytes the committee agrees to sign.
    pub value: Vec<u8>,
}

impl Message {
    /// Canonical domain-tagged encoding signed by committee members.
    ///
    /// This is deliberately not the wire envelope: signatures stay valid
    /// regardless of how a message was transported.
    pub fn signing_root(&self) -> Vec<u8> {
        let mut root = Vec::with_capacity(64 + self.lambda.as_bytes().len() + self.value.len());
        root.extend_from_slice(b"ssv:ibft:");
        root.push(self.msg_type.tag());
        root.extend_from_slice(&self.round.to_le_bytes());
        root.extend_from_slice(&self.seq_number.to_le_bytes());
        root.extend_from_slice(&(self.lambda.as_bytes().len() as u64).to_le_bytes());
        root.extend_from_slice(self.lambda.as_bytes());
        root.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
        root.extend_from_slice(&self.value);
        root
    }
}

/// A consensus message with a (possibly aggregated) BLS signature.
///
/// `signer_ids` is kept sorted and duplicate-free; `signature` verifies
/// against the aggregation of the signers' share public keys over
/// [`Message::signing_root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: Message,
    pub signature: BlsSignature,
    pub signer_ids: Vec<OperatorId>,
}

impl SignedMessage {
    pub fn new(message: Message, signature: BlsSignature, signer: OperatorId) -> Self {
        Self {
            message,
            signature,
            signer_ids: vec![signer],
        }
    }

    pub fn holds_signer(&self, id: OperatorId) -> bool {
        self.signer_ids.contains(&id)
    }

    /// True when any signer of `self` appears in `ids`.
    pub fn signers_intersect(&self, ids: &[OperatorId]) -> bool {
        self.signer_ids.iter().any(|s| ids.contains(s))
    }

    /// Fold another signature over the same message into this one.
    ///
    /// Signer sets must be disjoint; the union is kept sorted.
    pub fn aggregate(&mut self, other: &SignedMessage) -> Result<(), MessageError> {
        if self.message.signing_root() != other.message.signing_root() {
            return Err(MessageError::RootMismatch);
        }
        if other.signer_ids.is_empty() {
            return Err(MessageError::NoSigners);
        }
        if self.signers_intersect(&other.signer_ids) {
            return Err(MessageError::OverlappingSigners);
        }
        self.signature = self.signature.add(&other.signature)?;
        self.signer_ids.extend_from_slice(&other.signer_ids);
        self.signer_ids.sort_unstable();
        Ok(())
    }

    /// Verify the aggregated signature against the given public keys,
    /// which must correspond 1:1 to `signer_ids`.
    pub fn verify_aggregate(&self, pks: &[BlsPublicKey]) -> Result<(), MessageError> {
        if pks.is_empty() {
            return Err(MessageError::NoSigners);
        }
        let agg = BlsPublicKey::aggregate(pks)?;
        if agg.verify(&self.message.signing_root(), &self.signature) {
            Ok(())
        } else {
            Err(MessageError::InvalidSignature)
        }
    }
}

/// Justification carried in a change-round message's value.
///
/// A node that prepared in an earlier round attaches the prepared pair and
/// the prepare quorum that backs it; the next leader must re-propose the
/// highest justified value it sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeRoundJustification {
    pub prepared_round: Option<u64>,
    pub prepared_value: Option<Vec<u8>>,
    pub prepare_messages: Vec<SignedMessage>,
}

impl ChangeRoundJustification {
    pub fn is_prepared(&self) -> bool {
        self.prepared_round.is_some() && self.prepared_value.is_some()
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::Encoding(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        bincode::deserialize(bytes).map_err(|e| MessageError::Encoding(e.to_string()))
    }
}

/// Network-level message class, carried alongside the signed message so
/// listeners can route without inspecting consensus internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkMsgType {
    Ibft,
    Signature,
    Decided,
    Sync,
}

impl fmt::Display for NetworkMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkMsgType::Ibft => "ibft",
            NetworkMsgType::Signature => "signature",
            NetworkMsgType::Decided => "decided",
            NetworkMsgType::Sync => "sync",
        };
        write!(f, "{s}")
    }
}

/// Envelope published on the gossip topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEnvelope {
    pub msg_type: NetworkMsgType,
    pub signed_message: SignedMessage,
}

impl NetworkEnvelope {
    pub fn new(msg_type: NetworkMsgType, signed_message: SignedMessage) -> Self {
        Self {
            msg_type,
            signed_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls::BlsKeyPair;

    fn test_message(round: u64) -> Message {
        Message {
            msg_type: MessageType::Prepare,
            round,
            lambda: Lambda::from_slice(&[1, 2, 3, 4]),
            seq_number: 7,
            value: vec![0xAB],
        }
    }

    fn signed_by(kp: &BlsKeyPair, id: u64, msg: &Message) -> SignedMessage {
        SignedMessage::new(msg.clone(), kp.sign(&msg.signing_root()), OperatorId(id))
    }

    #[test]
    fn signing_root_commits_to_every_field() {
        let base = test_message(2);
        let mut other = base.clone();
        other.round = 3;
        assert_ne!(base.signing_root(), other.signing_root());

        let mut other = base.clone();
        other.value = vec![0xCD];
        assert_ne!(base.signing_root(), other.signing_root());

        let mut other = base.clone();
        other.msg_type = MessageType::Commit;
        assert_ne!(base.signing_root(), other.signing_root());
    }

    #[test]
    fn aggregate_unions_signers_and_verifies() {
        let kp1 = BlsKeyPair::generate();
        let kp2 = BlsKeyPair::generate();
        let msg = test_message(1);

        let mut agg = signed_by(&kp1, 2, &msg);
        agg.aggregate(&signed_by(&kp2, 1, &msg)).unwrap();

        assert_eq!(agg.signer_ids, vec![OperatorId(1), OperatorId(2)]);
        // pks in signer order
        agg.verify_aggregate(&[kp2.public_key(), kp1.public_key()])
            .unwrap();
    }

    #[test]
    fn aggregate_rejects_overlap_and_mismatch() {
        let kp1 = BlsKeyPair::generate();
        let msg = test_message(1);

        let mut agg = signed_by(&kp1, 1, &msg);
        let same_signer = signed_by(&kp1, 1, &msg);
        assert!(matches!(
            agg.aggregate(&same_signer),
            Err(MessageError::OverlappingSigners)
        ));

        let other_msg = test_message(9);
        let other = signed_by(&kp1, 2, &other_msg);
        assert!(matches!(
            agg.aggregate(&other),
            Err(MessageError::RootMismatch)
        ));
    }

    #[test]
    fn justification_roundtrip() {
        let kp = BlsKeyPair::generate();
        let msg = test_message(2);
        let just = ChangeRoundJustification {
            prepared_round: Some(2),
            prepared_value: Some(vec![0xAB]),
            prepare_messages: vec![signed_by(&kp, 1, &msg)],
        };
        let decoded = ChangeRoundJustification::decode(&just.encode().unwrap()).unwrap();
        assert_eq!(decoded, just);
        assert!(decoded.is_prepared());
        assert!(!ChangeRoundJustification::default().is_prepared());
    }
}
