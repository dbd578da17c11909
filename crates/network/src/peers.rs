//! Waiting for enough peers on a validator topic.

use crate::topics::Topic;
use crate::traits::{Network, NetworkError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum WaitPeersError {
    #[error("could not find {min} peers within the backoff limit")]
    LimitReached { min: usize },
    #[error("cancelled while waiting for peers")]
    Cancelled,
}

/// Wait until at least `min` peers joined the validator's topic.
///
/// The poll interval grows as `interval = 2 * interval` up to `limit`;
/// reaching the limit either fails (`stop_at_limit`) or wraps back to
/// `start` and keeps polling.
pub async fn wait_for_min_peers(
    network: &dyn Network,
    topic: &Topic,
    min: usize,
    start: Duration,
    limit: Duration,
    stop_at_limit: bool,
) -> Result<(), WaitPeersError> {
    let mut interval = start;
    loop {
        let n = match network.all_peers(topic).await {
            Ok(peers) => peers.len(),
            Err(e) => {
                error!(error = %e, "failed fetching peers");
                0
            }
        };
        if n >= min {
            info!(peers = n, min, "found enough peers");
            return Ok(());
        }
        info!(peers = n, min, "waiting for min peers");

        tokio::time::sleep(interval).await;

        interval *= 2;
        if interval >= limit {
            if stop_at_limit {
                return Err(WaitPeersError::LimitReached { min });
            }
            interval = start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{SyncRequest, SyncResponse};
    use crate::traits::PeerId;
    use async_trait::async_trait;
    use ssv_types::NetworkEnvelope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Network stub whose peer count grows by one per poll.
    struct GrowingPeers {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl Network for GrowingPeers {
        async fn broadcast(
            &self,
            _topic: &Topic,
            _envelope: NetworkEnvelope,
        ) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _topic: &Topic,
        ) -> Result<mpsc::Receiver<NetworkEnvelope>, NetworkError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn unsubscribe(&self, _topic: &Topic) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn all_peers(&self, _topic: &Topic) -> Result<Vec<PeerId>, NetworkError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok((0..n).map(|i| PeerId(format!("peer-{i}"))).collect())
        }

        async fn sync_request(
            &self,
            peer: &PeerId,
            _request: SyncRequest,
        ) -> Result<SyncResponse, NetworkError> {
            Err(NetworkError::PeerUnavailable(peer.clone()))
        }
    }

    #[tokio::test]
    async fn resolves_once_enough_peers() {
        let network = GrowingPeers {
            polls: AtomicUsize::new(0),
        };
        wait_for_min_peers(
            &network,
            &Topic::main(),
            2,
            Duration::from_millis(1),
            Duration::from_millis(100),
            false,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn fails_fast_at_limit_when_asked() {
        struct NoPeers;

        #[async_trait]
        impl Network for NoPeers {
            async fn broadcast(
                &self,
                _topic: &Topic,
                _envelope: NetworkEnvelope,
            ) -> Result<(), NetworkError> {
                Ok(())
            }
            async fn subscribe(
                &self,
                _topic: &Topic,
            ) -> Result<mpsc::Receiver<NetworkEnvelope>, NetworkError> {
                let (_tx, rx) = mpsc::channel(1);
                Ok(rx)
            }
            async fn unsubscribe(&self, _topic: &Topic) -> Result<(), NetworkError> {
                Ok(())
            }
            async fn all_peers(&self, _topic: &Topic) -> Result<Vec<PeerId>, NetworkError> {
                Ok(Vec::new())
            }
            async fn sync_request(
                &self,
                peer: &PeerId,
                _request: SyncRequest,
            ) -> Result<SyncResponse, NetworkError> {
                Err(NetworkError::PeerUnavailable(peer.clone()))
            }
        }

        let err = wait_for_min_peers(
            &NoPeers,
            &Topic::main(),
            1,
            Duration::from_millis(1),
            Duration::from_millis(4),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WaitPeersError::LimitReached { min: 1 }));
    }
}
