//! Catch-up client.

use futures::future::join_all;
use ssv_network::{Network, NetworkError, PeerId, Topic};
use ssv_storage::{DecidedStore, StoreError};
use ssv_types::{Lambda, MessageType, Share, SignedMessage};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How many peers are asked for their highest decided height.
const DEFAULT_QUERY_PEERS: usize = 4;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("every candidate peer failed while fetching decided history")]
    PeersExhausted,
}

/// Why a batch from one peer was rejected. Drops the peer, not the sync.
#[derive(Debug, Error)]
enum BatchError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("peer reported: {0}")]
    PeerReported(String),
    #[error("batch is not the contiguous range {from}..={to}")]
    NotContiguous { from: u64, to: u64 },
    #[error("certificate for sequence {0} failed quorum verification")]
    BadCertificate(u64),
}

/// Pulls missing decided certificates for one validator from its peers.
pub struct HistorySync {
    share: Arc<Share>,
    lambda: Lambda,
    network: Arc<dyn Network>,
    store: Arc<DecidedStore>,
    query_peers: usize,
}

impl HistorySync {
    pub fn new(
        share: Arc<Share>,
        lambda: Lambda,
        network: Arc<dyn Network>,
        store: Arc<DecidedStore>,
    ) -> Self {
        Self {
            share,
            lambda,
            network,
            store,
            query_peers: DEFAULT_QUERY_PEERS,
        }
    }

    /// Catch up to the highest decided sequence advertised by peers.
    ///
    /// No peers or no higher history is a clean no-op; the next duty will
    /// try again.
    pub async fn sync(&self) -> Result<(), SyncError> {
        let topic = Topic::validator(&self.share.validator_pk.to_bytes());
        let peers = self.network.all_peers(&topic).await?;
        if peers.is_empty() {
            info!(lambda = %self.lambda, "no peers to sync from");
            return Ok(());
        }
        let peers: Vec<PeerId> = peers.into_iter().take(self.query_peers).collect();

        let mut candidates = self.query_highest(&peers).await;
        if candidates.is_empty() {
            info!(lambda = %self.lambda, "no peer advertised decided history");
            return Ok(());
        }
        // Prefer the peers that advertise the most history.
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        let target = candidates[0].1;

        let local = self
            .store
            .get_highest(&self.lambda)?
            .map(|m| m.message.seq_number);
        let from = local.map(|s| s + 1).unwrap_or(0);
        if local.is_some_and(|s| s >= target) {
            debug!(lambda = %self.lambda, local = ?local, target, "already up to date");
            return Ok(());
        }

        info!(
            lambda = %self.lambda,
            from,
            target,
            peers = candidates.len(),
            "syncing decided history"
        );
        self.fetch_range(candidates, from, target).await
    }

    /// Ask every peer for its highest decided certificate; keep the ones
    /// whose answer carries a valid quorum.
    async fn query_highest(&self, peers: &[PeerId]) -> Vec<(PeerId, u64)> {
        let queries = peers.iter().map(|peer| {
            let network = self.network.clone();
            let lambda = self.lambda.clone();
            async move {
                let result = network.get_highest_decided(peer, &lambda).await;
                (peer.clone(), result)
            }
        });

        let mut candidates = Vec::new();
        for (peer, result) in join_all(queries).await {
            match result {
                Ok(response) => {
                    if let Some(reason) = response.error {
                        debug!(%peer, reason = %reason, "peer has no highest decided");
                        continue;
                    }
                    let Some(msg) = response.messages.first() else {
                        continue;
                    };
                    if self.is_valid_certificate(msg) {
                        candidates.push((peer, msg.message.seq_number));
                    } else {
                        warn!(%peer, "peer advertised an unverifiable highest decided");
                    }
                }
                Err(e) => warn!(%peer, error = %e, "highest decided query failed"),
            }
        }
        candidates
    }

    /// Pull `from..=target` in `max_batch`-capped batches, dropping peers
    /// that serve bad batches.
    async fn fetch_range(
        &self,
        mut peers: Vec<(PeerId, u64)>,
        from: u64,
        target: u64,
    ) -> Result<(), SyncError> {
        let max_batch = self.network.max_batch().max(1) as u64;
        let mut expected = from;
        let mut last: Option<SignedMessage> = None;

        while expected <= target {
            let to = (expected + max_batch - 1).min(target);
            let mut fetched = None;

            while let Some((peer, _)) = peers.first().cloned() {
                match self.fetch_batch(&peer, expected, to).await {
                    Ok(batch) => {
                        fetched = Some(batch);
                        break;
                    }
                    Err(e) => {
                        warn!(%peer, from = expected, to, error = %e, "dropping sync peer");
                        peers.remove(0);
                    }
                }
            }

            let batch = fetched.ok_or(SyncError::PeersExhausted)?;
            for msg in &batch {
                self.store.save_decided(msg)?;
            }
            last = batch.into_iter().last().or(last);
            expected = to + 1;
        }

        if let Some(msg) = last {
            self.store.save_highest(&msg)?;
            info!(lambda = %self.lambda, highest = msg.message.seq_number, "decided history synced");
        }
        Ok(())
    }

    async fn fetch_batch(
        &self,
        peer: &PeerId,
        from: u64,
        to: u64,
    ) -> Result<Vec<SignedMessage>, BatchError> {
        let response = self
            .network
            .get_decided_range(peer, &self.lambda, from, to)
            .await?;
        if let Some(reason) = response.error {
            return Err(BatchError::PeerReported(reason));
        }

        let expected: Vec<u64> = (from..=to).collect();
        let got: Vec<u64> = response
            .messages
            .iter()
            .map(|m| m.message.seq_number)
            .collect();
        if got != expected {
            return Err(BatchError::NotContiguous { from, to });
        }
        for msg in &response.messages {
            if !self.is_valid_certificate(msg) {
                return Err(BatchError::BadCertificate(msg.message.seq_number));
            }
        }
        Ok(response.messages)
    }

    /// A decided certificate must carry a full commit quorum over this
    /// share's committee.
    fn is_valid_certificate(&self, msg: &SignedMessage) -> bool {
        msg.message.msg_type == MessageType::Commit
            && msg.message.lambda == self.lambda
            && msg.signer_ids.len() >= self.share.threshold()
            && self.share.verify_signed_message(msg).is_ok()
    }
}
