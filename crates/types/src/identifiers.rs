//! Identifier newtypes shared across the node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a committee member (1-based, assigned by the registry contract).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OperatorId(pub u64);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OperatorId {
    fn from(id: u64) -> Self {
        OperatorId(id)
    }
}

/// Opaque identifier of a consensus instance.
///
/// Typically derived from the duty parameters (validator pubkey, role, slot).
/// The engine never interprets the bytes; it only compares and displays them.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Lambda(Vec<u8>);

impl Lambda {
    pub fn new(bytes: Vec<u8>) -> Self {
        Lambda(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Lambda(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lambda({})", hex::encode(&self.0))
    }
}

impl From<&[u8]> for Lambda {
    fn from(bytes: &[u8]) -> Self {
        Lambda(bytes.to_vec())
    }
}
