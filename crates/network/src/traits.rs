//! Transport trait implemented by the gossip/stream layer.

use crate::codec::CodecError;
use crate::messages::{SyncRequest, SyncRequestKind, SyncResponse};
use crate::topics::Topic;
use async_trait::async_trait;
use ssv_types::{Lambda, NetworkEnvelope};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque peer identifier assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("peer {0} unavailable")]
    PeerUnavailable(PeerId),
    #[error("request to {0} timed out")]
    Timeout(PeerId),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The transport as seen from inside the node.
///
/// Implementations deliver broadcast messages back to the local node as
/// well, so an instance observes its own consensus messages through the
/// same path as everyone else's.
#[async_trait]
pub trait Network: Send + Sync {
    /// Publish an envelope on a topic.
    async fn broadcast(&self, topic: &Topic, envelope: NetworkEnvelope)
        -> Result<(), NetworkError>;

    /// Join a topic and receive its envelopes.
    async fn subscribe(
        &self,
        topic: &Topic,
    ) -> Result<mpsc::Receiver<NetworkEnvelope>, NetworkError>;

    /// Leave a topic previously joined with `subscribe`.
    async fn unsubscribe(&self, topic: &Topic) -> Result<(), NetworkError>;

    /// Peers currently connected on a topic.
    async fn all_peers(&self, topic: &Topic) -> Result<Vec<PeerId>, NetworkError>;

    /// One request/response exchange on the dedicated sync stream.
    async fn sync_request(
        &self,
        peer: &PeerId,
        request: SyncRequest,
    ) -> Result<SyncResponse, NetworkError>;

    /// Largest number of decided messages a peer may return per response.
    fn max_batch(&self) -> usize {
        25
    }

    /// Ask a peer for its highest decided certificate.
    async fn get_highest_decided(
        &self,
        peer: &PeerId,
        lambda: &Lambda,
    ) -> Result<SyncResponse, NetworkError> {
        self.sync_request(
            peer,
            SyncRequest {
                lambda: lambda.clone(),
                kind: SyncRequestKind::GetHighestDecided,
            },
        )
        .await
    }

    /// Ask a peer for decided certificates in `from..=to`.
    async fn get_decided_range(
        &self,
        peer: &PeerId,
        lambda: &Lambda,
        from: u64,
        to: u64,
    ) -> Result<SyncResponse, NetworkError> {
        self.sync_request(
            peer,
            SyncRequest {
                lambda: lambda.clone(),
                kind: SyncRequestKind::GetDecidedRange { from, to },
            },
        )
        .await
    }

    /// Ask a peer for its last broadcast change-round message.
    async fn get_last_change_round(
        &self,
        peer: &PeerId,
        lambda: &Lambda,
    ) -> Result<SyncResponse, NetworkError> {
        self.sync_request(
            peer,
            SyncRequest {
                lambda: lambda.clone(),
                kind: SyncRequestKind::GetLastChangeRound,
            },
        )
        .await
    }
}
