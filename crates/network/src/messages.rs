//! Sync stream request/response frames.

use serde::{Deserialize, Serialize};
use ssv_types::{Lambda, SignedMessage};

/// What a sync request asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncRequestKind {
    /// The peer's highest decided certificate for the lambda.
    GetHighestDecided,
    /// Decided certificates for an inclusive sequence range.
    GetDecidedRange { from: u64, to: u64 },
    /// The peer's last broadcast change-round message, for justification
    /// replay after a restart.
    GetLastChangeRound,
}

/// One request frame on the sync stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub lambda: Lambda,
    pub kind: SyncRequestKind,
}

/// One response frame on the sync stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub lambda: Lambda,
    pub messages: Vec<SignedMessage>,
    pub error: Option<String>,
}

impl SyncResponse {
    pub fn ok(lambda: Lambda, messages: Vec<SignedMessage>) -> Self {
        Self {
            lambda,
            messages,
            error: None,
        }
    }

    pub fn failed(lambda: Lambda, error: impl Into<String>) -> Self {
        Self {
            lambda,
            messages: Vec::new(),
            error: Some(error.into()),
        }
    }
}
