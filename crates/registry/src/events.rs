//! Contract event model.
//!
//! A closed set of event kinds, exhaustively matched wherever events are
//! handled.

use serde::{Deserialize, Serialize};

/// On-chain coordinates of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub block_number: u64,
    pub tx_hash: Vec<u8>,
    pub log_index: u64,
}

/// One operator's entry in a `ValidatorAdded` event: its registered
/// public key, the share public key derived for it, and the share secret
/// encrypted to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorShare {
    pub operator_pubkey: Vec<u8>,
    pub share_pubkey: Vec<u8>,
    pub encrypted_key: Vec<u8>,
}

/// Payload of a contract event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventData {
    OperatorAdded {
        id: u64,
        pubkey: Vec<u8>,
        name: String,
    },
    ValidatorAdded {
        pubkey: Vec<u8>,
        shares: Vec<OperatorShare>,
    },
    /// Terminal event of a history replay. `logs` lists what was parsed;
    /// `success` is false when some events could not be decoded.
    SyncEnded { logs: Vec<RawLog>, success: bool },
}

/// A contract event with its on-chain coordinates.
///
/// The synchronizer delivers events in ascending `block_number`, ties
/// broken by `log_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub log: RawLog,
    pub data: EventData,
}

impl Event {
    pub fn is_sync_ended(&self) -> bool {
        matches!(self.data, EventData::SyncEnded { .. })
    }
}
