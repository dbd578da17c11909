//! Shared fixtures for tests across the workspace.
//!
//! Builds small committees with real BLS keys so signature paths are
//! exercised end to end rather than mocked out.

use crate::bls::BlsKeyPair;
use crate::identifiers::{Lambda, OperatorId};
use crate::message::{Message, MessageType, SignedMessage};
use crate::share::{CommitteeMember, Share};
use std::collections::BTreeMap;

/// Generate `n` operator key pairs.
pub fn test_keys(n: u64) -> Vec<BlsKeyPair> {
    (0..n).map(|_| BlsKeyPair::generate()).collect()
}

/// Build the committee map for a set of operator keys (ids 1..=n).
pub fn test_committee(kps: &[BlsKeyPair]) -> BTreeMap<OperatorId, CommitteeMember> {
    kps.iter()
        .enumerate()
        .map(|(i, kp)| {
            let id = OperatorId(i as u64 + 1);
            (
                id,
                CommitteeMember {
                    ibft_id: id,
                    pubkey: kp.public_key().to_bytes().to_vec(),
                    share_key: None,
                },
            )
        })
        .collect()
}

/// Build operator `node_id`'s share over the given committee keys.
pub fn test_share_for(node_id: u64, kps: &[BlsKeyPair]) -> Share {
    let validator = BlsKeyPair::generate();
    Share {
        node_id: OperatorId(node_id),
        validator_pk: validator.public_key(),
        share_key: Some(kps[node_id as usize - 1].secret_key().clone()),
        committee: test_committee(kps),
        metadata: None,
    }
}

/// A consensus message with the given coordinates.
pub fn test_message(
    msg_type: MessageType,
    round: u64,
    lambda: &Lambda,
    seq_number: u64,
    value: Vec<u8>,
) -> Message {
    Message {
        msg_type,
        round,
        lambda: lambda.clone(),
        seq_number,
        value,
    }
}

/// Sign `msg` as operator `id` with the given key pair.
pub fn signed_by(kp: &BlsKeyPair, id: u64, msg: &Message) -> SignedMessage {
    SignedMessage::new(msg.clone(), kp.sign(&msg.signing_root()), OperatorId(id))
}

/// A change-round message claiming `round`, signed by operator `id`.
pub fn change_round_msg(
    kp: &BlsKeyPair,
    id: u64,
    lambda: &Lambda,
    round: u64,
    seq_number: u64,
) -> SignedMessage {
    let msg = Message {
        msg_type: MessageType::ChangeRound,
        round,
        lambda: lambda.clone(),
        seq_number,
        value: Vec::new(),
    };
    signed_by(kp, id, &msg)
}
