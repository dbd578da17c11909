//! Four operators driving one validator end to end: registry events build
//! the shares, setup joins the topic, and a duty runs to a decided
//! certificate on every node.

use async_trait::async_trait;
use parking_lot::Mutex;
use ssv_network::{Network, NetworkError, PeerId, SyncRequest, SyncRequestKind, SyncResponse, Topic};
use ssv_node::{Beacon, ControllerOptions, KeyManager, NodeConfig, NodeError, ValidatorController};
use ssv_registry::{Event, EventData, OperatorShare, RawLog};
use ssv_storage::MemDb;
use ssv_types::bls::BlsKeyPair;
use ssv_types::{NetworkEnvelope, ValidatorMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Gossip hub: routes broadcasts to every subscriber of the topic,
/// including the sender's own listener.
#[derive(Default)]
struct HubNetwork {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<NetworkEnvelope>>>>,
}

#[async_trait]
impl Network for HubNetwork {
    async fn broadcast(&self, topic: &Topic, envelope: NetworkEnvelope) -> Result<(), NetworkError> {
        let txs = self
            .subscribers
            .lock()
            .get(&topic.name())
            .cloned()
            .unwrap_or_default();
        for tx in txs {
            let _ = tx.send(envelope.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
    ) -> Result<mpsc::Receiver<NetworkEnvelope>, NetworkError> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers
            .lock()
            .entry(topic.name())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), NetworkError> {
        self.subscribers.lock().remove(&topic.name());
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

struct NoBeacon;

#[async_trait]
impl Beacon for NoBeacon {
    async fn validator_metadata(
        &self,
        _pubkeys: &[Vec<u8>],
    ) -> Result<HashMap<String, ValidatorMetadata>, NodeError> {
        Ok(HashMap::new())
    }
}

/// Key manager whose "encryption" is the identity: the encrypted blob is
/// the BLS secret itself. Good enough to exercise the share-building path.
struct PlainKeys {
    pubkey: Vec<u8>,
}

impl KeyManager for PlainKeys {
    fn operator_pubkey(&self) -> Vec<u8> {
        self.pubkey.clone()
    }

    fn decrypt_share(&self, encrypted: &[u8]) -> Result<Vec<u8>, NodeError> {
        Ok(encrypted.to_vec())
    }
}

fn operator_pubkey(i: usize) -> Vec<u8> {
    format!("operator-key-{i}").into_bytes()
}

fn validator_added(validator_pk: &[u8], kps: &[BlsKeyPair]) -> Event {
    Event {
        log: RawLog {
            block_number: 0x4e7070,
            tx_hash: vec![0xaa],
            log_index: 0,
        },
        data: EventData::ValidatorAdded {
            pubkey: validator_pk.to_vec(),
            shares: kps
                .iter()
                .enumerate()
                .map(|(i, kp)| OperatorShare {
                    operator_pubkey: operator_pubkey(i),
                    share_pubkey: kp.public_key().to_bytes().to_vec(),
                    encrypted_key: kp.secret_key().to_bytes().to_vec(),
                })
                .collect(),
        },
    }
}

fn controller(network: &Arc<HubNetwork>, operator_index: usize) -> Arc<ValidatorController> {
    let config = NodeConfig {
        min_peers: 0,
        ..NodeConfig::default()
    };
    ValidatorController::new(ControllerOptions {
        db: Arc::new(MemDb::new()),
        network: network.clone() as Arc<dyn Network>,
        beacon: Arc::new(NoBeacon),
        keys: Arc::new(PlainKeys {
            pubkey: operator_pubkey(operator_index),
        }),
        config,
    })
    .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn registry_event_to_decided_duty() {
    init_tracing();
    let network = Arc::new(HubNetwork::default());
    let kps: Vec<BlsKeyPair> = (0..4).map(|_| BlsKeyPair::generate()).collect();
    let validator = BlsKeyPair::generate();
    let validator_pk = validator.public_key().to_bytes().to_vec();

    let controllers: Vec<Arc<ValidatorController>> =
        (0..4).map(|i| controller(&network, i)).collect();

    // The same contract event reaches every operator.
    let event = validator_added(&validator_pk, &kps);
    for (i, ctrl) in controllers.iter().enumerate() {
        ctrl.handle_registry_event(event.clone()).unwrap();
        let share = ctrl
            .share_store()
            .get(&validator_pk)
            .unwrap()
            .expect("share stored from event");
        assert_eq!(share.node_id.0, i as u64 + 1);
        assert_eq!(share.committee_size(), 4);
        assert_eq!(share.threshold(), 3);
        assert!(share.share_key.is_some());
    }

    // Setup joins the topic and reports ready.
    for ctrl in &controllers {
        let errors = ctrl.wait_for_setups().await;
        assert!(errors.is_empty(), "setup failed: {errors:?}");
        assert!(ctrl.session_topic(&validator_pk).is_some());
    }

    // One duty, all four operators.
    let lambda = ValidatorController::main_lambda(&validator_pk);
    let duties = controllers.iter().map(|ctrl| {
        let ctrl = ctrl.clone();
        let lambda = lambda.clone();
        let pk = validator_pk.clone();
        tokio::spawn(async move { ctrl.run_duty(&pk, lambda, 0, vec![0xAB]).await })
    });

    for handle in duties {
        let cert = handle.await.unwrap().expect("duty decided");
        assert_eq!(cert.message.value, vec![0xAB]);
        assert!(cert.signer_ids.len() >= 3);
    }

    // Every node persisted the decided certificate.
    for ctrl in &controllers {
        let stored = ctrl
            .decided_store()
            .get_decided(&lambda, 0)
            .unwrap()
            .expect("decided persisted");
        assert_eq!(stored.message.value, vec![0xAB]);
        let highest = ctrl
            .decided_store()
            .get_highest(&lambda)
            .unwrap()
            .expect("highest recorded");
        assert_eq!(highest.message.seq_number, 0);
    }

    // A lagging peer asking over the sync stream gets the certificate.
    let response = controllers[0].sync_request_handler().handle(SyncRequest {
        lambda: lambda.clone(),
        kind: SyncRequestKind::GetHighestDecided,
    });
    assert!(response.error.is_none());
    assert_eq!(response.messages[0].message.seq_number, 0);

    for ctrl in &controllers {
        ctrl.stop();
    }
}

#[tokio::test]
async fn validator_added_without_this_operator_is_skipped() {
    let network = Arc::new(HubNetwork::default());
    let kps: Vec<BlsKeyPair> = (0..4).map(|_| BlsKeyPair::generate()).collect();
    let validator = BlsKeyPair::generate();
    let validator_pk = validator.public_key().to_bytes().to_vec();

    // Operator index 9 is not part of the committee in the event.
    let ctrl = controller(&network, 9);
    ctrl.handle_registry_event(validator_added(&validator_pk, &kps))
        .unwrap();
    assert!(ctrl.share_store().get(&validator_pk).unwrap().is_none());
    ctrl.stop();
}

#[tokio::test]
async fn duty_without_session_fails_cleanly() {
    let network = Arc::new(HubNetwork::default());
    let ctrl = controller(&network, 0);
    let err = ctrl
        .run_duty(&[0xEE; 48], ValidatorController::main_lambda(&[0xEE; 48]), 0, vec![1])
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::SessionNotFound(_)));
    ctrl.stop();
}
