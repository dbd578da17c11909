//! Standard index families.
//!
//! Every message entering the queue is tagged by each index function with
//! zero or more string keys. The consensus engine pulls by these keys.

use crate::IndexFn;
use ssv_types::{Lambda, MessageType, NetworkEnvelope, NetworkMsgType};

/// Key for a specific consensus message at a known round.
pub fn ibft_index_key(lambda: &Lambda, seq_number: u64, round: u64, msg_type: MessageType) -> String {
    format!("ibft/{lambda}/{seq_number}/{round}/{msg_type}")
}

/// Key collecting every change-round message for a sequence regardless of
/// round. Needed for partial-quorum detection.
pub fn change_round_all_index_key(lambda: &Lambda, seq_number: u64) -> String {
    format!("change-round-all/{lambda}/{seq_number}")
}

/// Key for partial signature messages of a sequence.
pub fn sig_index_key(lambda: &Lambda, seq_number: u64) -> String {
    format!("sig/{lambda}/{seq_number}")
}

/// Key for decided messages across all sequences of a lambda.
pub fn decided_index_key(lambda: &Lambda) -> String {
    format!("decided/{lambda}")
}

/// Key for sync protocol responses of a lambda.
pub fn sync_index_key(lambda: &Lambda) -> String {
    format!("sync/{lambda}")
}

pub(crate) fn ibft_message_index() -> IndexFn {
    Box::new(|envelope: &NetworkEnvelope| {
        if envelope.msg_type != NetworkMsgType::Ibft {
            return Vec::new();
        }
        let m = &envelope.signed_message.message;
        vec![ibft_index_key(&m.lambda, m.seq_number, m.round, m.msg_type)]
    })
}

pub(crate) fn change_round_all_index() -> IndexFn {
    Box::new(|envelope: &NetworkEnvelope| {
        let m = &envelope.signed_message.message;
        if envelope.msg_type != NetworkMsgType::Ibft || m.msg_type != MessageType::ChangeRound {
            return Vec::new();
        }
        vec![change_round_all_index_key(&m.lambda, m.seq_number)]
    })
}

pub(crate) fn sig_message_index() -> IndexFn {
    Box::new(|envelope: &NetworkEnvelope| {
        if envelope.msg_type != NetworkMsgType::Signature {
            return Vec::new();
        }
        let m = &envelope.signed_message.message;
        vec![sig_index_key(&m.lambda, m.seq_number)]
    })
}

pub(crate) fn decided_message_index() -> IndexFn {
    Box::new(|envelope: &NetworkEnvelope| {
        if envelope.msg_type != NetworkMsgType::Decided {
            return Vec::new();
        }
        vec![decided_index_key(&envelope.signed_message.message.lambda)]
    })
}

pub(crate) fn sync_message_index() -> IndexFn {
    Box::new(|envelope: &NetworkEnvelope| {
        if envelope.msg_type != NetworkMsgType::Sync {
            return Vec::new();
        }
        vec![sync_index_key(&envelope.signed_message.message.lambda)]
    })
}
