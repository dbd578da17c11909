//! Serving side of the sync stream.

use ssv_network::{SyncRequest, SyncRequestKind, SyncResponse};
use ssv_storage::DecidedStore;
use std::sync::Arc;
use tracing::debug;

/// Answers one sync request from the decided store. One request frame in,
/// one response frame out.
pub struct RequestHandler {
    store: Arc<DecidedStore>,
    max_batch: usize,
}

impl RequestHandler {
    pub fn new(store: Arc<DecidedStore>, max_batch: usize) -> Self {
        Self {
            store,
            max_batch: max_batch.max(1),
        }
    }

    pub fn handle(&self, request: SyncRequest) -> SyncResponse {
        debug!(lambda = %request.lambda, kind = ?request.kind, "sync request");
        match request.kind {
            SyncRequestKind::GetHighestDecided => match self.store.get_highest(&request.lambda) {
                Ok(Some(msg)) => SyncResponse::ok(request.lambda, vec![msg]),
                Ok(None) => SyncResponse::failed(request.lambda, "highest decided not found"),
                Err(e) => SyncResponse::failed(request.lambda, e.to_string()),
            },
            SyncRequestKind::GetDecidedRange { from, to } => {
                // Never return more than one batch worth of certificates.
                let capped_to = to.min(from.saturating_add(self.max_batch as u64 - 1));
                match self
                    .store
                    .get_decided_range(&request.lambda, from, capped_to)
                {
                    Ok(msgs) => SyncResponse::ok(request.lambda, msgs),
                    Err(e) => SyncResponse::failed(request.lambda, e.to_string()),
                }
            }
            SyncRequestKind::GetLastChangeRound => {
                match self.store.get_last_change_round(&request.lambda) {
                    Ok(Some(msg)) => SyncResponse::ok(request.lambda, vec![msg]),
                    Ok(None) => SyncResponse::failed(request.lambda, "no change round message"),
                    Err(e) => SyncResponse::failed(request.lambda, e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssv_storage::MemDb;
    use ssv_types::test_utils::{signed_by, test_keys, test_message};
    use ssv_types::{Lambda, MessageType};

    fn handler_with_history(lambda: &Lambda, up_to: u64, max_batch: usize) -> RequestHandler {
        let store = Arc::new(DecidedStore::new(Arc::new(MemDb::new())));
        let kps = test_keys(1);
        for seq in 0..=up_to {
            let msg = test_message(MessageType::Commit, 1, lambda, seq, vec![0xAB]);
            store.save_decided(&signed_by(&kps[0], 1, &msg)).unwrap();
            if seq == up_to {
                store.save_highest(&signed_by(&kps[0], 1, &msg)).unwrap();
            }
        }
        RequestHandler::new(store, max_batch)
    }

    #[test]
    fn serves_highest_decided() {
        let lambda = Lambda::from_slice(&[1]);
        let handler = handler_with_history(&lambda, 7, 25);

        let response = handler.handle(SyncRequest {
            lambda: lambda.clone(),
            kind: SyncRequestKind::GetHighestDecided,
        });
        assert!(response.error.is_none());
        assert_eq!(response.messages[0].message.seq_number, 7);

        let empty = RequestHandler::new(
            Arc::new(DecidedStore::new(Arc::new(MemDb::new()))),
            25,
        );
        let response = empty.handle(SyncRequest {
            lambda,
            kind: SyncRequestKind::GetHighestDecided,
        });
        assert!(response.error.is_some());
        assert!(response.messages.is_empty());
    }

    #[test]
    fn caps_range_responses_at_max_batch() {
        let lambda = Lambda::from_slice(&[2]);
        let handler = handler_with_history(&lambda, 20, 4);

        let response = handler.handle(SyncRequest {
            lambda: lambda.clone(),
            kind: SyncRequestKind::GetDecidedRange { from: 3, to: 15 },
        });
        assert!(response.error.is_none());
        let seqs: Vec<u64> = response
            .messages
            .iter()
            .map(|m| m.message.seq_number)
            .collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }

    #[test]
    fn serves_last_change_round() {
        let lambda = Lambda::from_slice(&[3]);
        let store = Arc::new(DecidedStore::new(Arc::new(MemDb::new())));
        let kps = test_keys(1);
        let cr = signed_by(
            &kps[0],
            1,
            &test_message(MessageType::ChangeRound, 4, &lambda, 9, Vec::new()),
        );
        store.save_last_change_round(&cr).unwrap();
        let handler = RequestHandler::new(store, 25);

        let response = handler.handle(SyncRequest {
            lambda,
            kind: SyncRequestKind::GetLastChangeRound,
        });
        assert!(response.error.is_none());
        assert_eq!(response.messages[0].message.round, 4);
    }
}
