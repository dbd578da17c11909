//! Per-validator orchestration.

use crate::beacon::Beacon;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::keys::KeyManager;
use crate::metadata::{update_validators_metadata, METADATA_BATCH_SIZE};
use crate::metrics;
use parking_lot::RwLock;
use ssv_broker::{change_round_all_index_key, ibft_index_key, sig_index_key, MessageQueue};
use ssv_ibft::{Instance, InstanceConfig, InstanceOptions, RoundTimer, Stage};
use ssv_network::{wait_for_min_peers, Network, Topic};
use ssv_registry::{Event, EventData, OperatorShare, RegistryError, RegistryEventHandler};
use ssv_storage::{Database, DecidedStore, ShareStore, SyncOffsetStore};
use ssv_sync::{HistorySync, RequestHandler};
use ssv_tasks::{ExecutionQueue, TaskError};
use ssv_types::{
    bls::{BlsPublicKey, BlsSecretKey},
    CommitteeMember, Lambda, MessageType, NetworkMsgType, OperatorId, Share, SignedMessage,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PEER_WAIT_START: Duration = Duration::from_secs(1);
const PEER_WAIT_LIMIT: Duration = Duration::from_secs(64);
const SETUP_QUEUE_INTERVAL: Duration = Duration::from_millis(100);
const INSTANCE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const HISTORY_SYNC_RETRIES: u32 = 3;

/// Collaborators handed to the controller at startup.
pub struct ControllerOptions {
    pub db: Arc<dyn Database>,
    pub network: Arc<dyn Network>,
    pub beacon: Arc<dyn Beacon>,
    pub keys: Arc<dyn KeyManager>,
    pub config: NodeConfig,
}

/// Live per-validator state: the joined topic, the broker queue its
/// listener fills, and the listener task itself.
struct ValidatorSession {
    share: Arc<Share>,
    queue: Arc<MessageQueue>,
    topic: Topic,
    listener: JoinHandle<()>,
}

/// Orchestrates validators end to end: registry events in, decided duty
/// certificates out.
pub struct ValidatorController {
    /// Self-handle for tasks spawned from `&self` methods.
    this: Weak<ValidatorController>,
    shares: Arc<ShareStore>,
    decided: Arc<DecidedStore>,
    offsets: Arc<SyncOffsetStore>,
    network: Arc<dyn Network>,
    beacon: Arc<dyn Beacon>,
    keys: Arc<dyn KeyManager>,
    config: NodeConfig,
    instance_config: InstanceConfig,
    setup_queue: ExecutionQueue,
    sessions: RwLock<HashMap<String, Arc<ValidatorSession>>>,
    cancel: CancellationToken,
}

impl ValidatorController {
    pub fn new(opts: ControllerOptions) -> Result<Arc<Self>, NodeError> {
        let shares = Arc::new(ShareStore::new(opts.db.clone()));
        let decided = Arc::new(DecidedStore::new(opts.db.clone()));
        let offsets = Arc::new(SyncOffsetStore::new(opts.db));

        if opts.config.clean_registry_data {
            shares.clean()?;
            offsets.clean()?;
            debug!("cleaned registry data");
        }
        shares.load_multiple_from_config(&opts.config.shares);

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            shares,
            decided,
            offsets,
            network: opts.network,
            beacon: opts.beacon,
            keys: opts.keys,
            config: opts.config,
            instance_config: InstanceConfig::default(),
            setup_queue: ExecutionQueue::new(SETUP_QUEUE_INTERVAL),
            sessions: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn share_store(&self) -> Arc<ShareStore> {
        self.shares.clone()
    }

    pub fn decided_store(&self) -> Arc<DecidedStore> {
        self.decided.clone()
    }

    pub fn offset_store(&self) -> Arc<SyncOffsetStore> {
        self.offsets.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop everything: running instances observe the cancellation between
    /// transitions, listeners exit, pending setups are discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.setup_queue.stop();
        for session in self.sessions.write().drain().map(|(_, s)| s) {
            session.listener.abort();
        }
    }

    /// The identifier of a validator's main consensus sequence.
    pub fn main_lambda(validator_pk: &[u8]) -> Lambda {
        Lambda::new(format!("{}_ATTESTER", hex::encode(validator_pk)).into_bytes())
    }

    /// Handler to plug into the registry synchronizer.
    pub fn registry_event_handler(&self) -> RegistryEventHandler {
        let this = self.this.clone();
        Arc::new(move |event| match this.upgrade() {
            Some(controller) => controller.handle_registry_event(event),
            None => Ok(()),
        })
    }

    /// Apply one registry event.
    pub fn handle_registry_event(&self, event: Event) -> Result<(), RegistryError> {
        match event.data {
            EventData::OperatorAdded { id, pubkey, name } => {
                info!(id, name = %name, pubkey = %hex::encode(&pubkey), "operator added");
                Ok(())
            }
            EventData::ValidatorAdded { pubkey, shares } => {
                let Some(share) = self
                    .share_from_event(&pubkey, &shares)
                    .map_err(|e| RegistryError::Handler(e.to_string()))?
                else {
                    debug!(
                        pubkey = %hex::encode(&pubkey),
                        "validator added without this operator, skipping"
                    );
                    return Ok(());
                };
                self.shares
                    .save(&share)
                    .map_err(|e| RegistryError::Handler(e.to_string()))?;
                info!(
                    pubkey = %share.validator_pk.to_hex(),
                    node_id = %share.node_id,
                    committee = share.committee_size(),
                    "validator share stored"
                );
                self.trigger_validator(&share.validator_pk.to_bytes());
                Ok(())
            }
            // The synchronizer consumes the terminal event itself.
            EventData::SyncEnded { .. } => Ok(()),
        }
    }

    /// Build this operator's share from a `ValidatorAdded` event. Returns
    /// `None` when this operator is not part of the committee.
    fn share_from_event(
        &self,
        validator_pk: &[u8],
        operator_shares: &[OperatorShare],
    ) -> Result<Option<Share>, NodeError> {
        if operator_shares.is_empty() {
            return Err(NodeError::Config("validator event carries no shares".into()));
        }
        let own_pubkey = self.keys.operator_pubkey();

        let mut committee = BTreeMap::new();
        let mut own = None;
        for (i, os) in operator_shares.iter().enumerate() {
            let id = OperatorId(i as u64 + 1);
            committee.insert(
                id,
                CommitteeMember {
                    ibft_id: id,
                    pubkey: os.share_pubkey.clone(),
                    share_key: None,
                },
            );
            if os.operator_pubkey == own_pubkey {
                own = Some((id, os));
            }
        }
        let Some((node_id, own_share)) = own else {
            return Ok(None);
        };

        let secret_bytes = self.keys.decrypt_share(&own_share.encrypted_key)?;
        let share_key = BlsSecretKey::from_bytes(&secret_bytes)
            .map_err(|e| NodeError::Keys(e.to_string()))?;
        if share_key.public_key().to_bytes().to_vec() != own_share.share_pubkey {
            return Err(NodeError::Keys(
                "decrypted share does not match the registered share public key".into(),
            ));
        }

        Ok(Some(Share {
            node_id,
            validator_pk: BlsPublicKey::from_bytes(validator_pk)
                .map_err(|e| NodeError::Keys(e.to_string()))?,
            share_key: Some(share_key),
            committee,
            metadata: None,
        }))
    }

    /// Kick off setup for every stored validator this operator serves.
    /// Returns how many setups were dispatched.
    pub fn start_validators(&self) -> Result<usize, NodeError> {
        let shares = self.shares.list()?;
        metrics::metrics().validators_known.set(shares.len() as f64);

        let mut triggered = 0;
        for share in &shares {
            if share.share_key.is_none() {
                continue;
            }
            if self.trigger_validator(&share.validator_pk.to_bytes()) {
                triggered += 1;
            }
        }
        info!(total = shares.len(), triggered, "starting validators");
        Ok(triggered)
    }

    /// Queue a validator's setup, deduplicated by public key so two
    /// triggers never run concurrently for the same validator.
    pub fn trigger_validator(&self, validator_pk: &[u8]) -> bool {
        let Some(controller) = self.this.upgrade() else {
            return false;
        };
        let pk_hex = hex::encode(validator_pk);
        let pk = validator_pk.to_vec();
        self.setup_queue.queue_distinct(
            async move {
                controller
                    .setup_validator(&pk)
                    .await
                    .map_err(|e| TaskError::new(e.to_string()))
            },
            &format!("validator-setup/{pk_hex}"),
        )
    }

    /// Per-validator setup: join the topic, wait for peers, catch up on
    /// decided history. Idempotent; an existing session is left alone.
    async fn setup_validator(&self, validator_pk: &[u8]) -> Result<(), NodeError> {
        let pk_hex = hex::encode(validator_pk);
        if self.sessions.read().contains_key(&pk_hex) {
            return Ok(());
        }
        let share = Arc::new(
            self.shares
                .get(validator_pk)?
                .ok_or_else(|| NodeError::ShareNotFound(pk_hex.clone()))?,
        );

        let topic = Topic::validator(validator_pk);
        let rx = self.network.subscribe(&topic).await?;
        let queue = Arc::new(MessageQueue::new());
        let listener = self.spawn_listener(rx, queue.clone(), share.clone());
        self.sessions.write().insert(
            pk_hex.clone(),
            Arc::new(ValidatorSession {
                share: share.clone(),
                queue,
                topic: topic.clone(),
                listener,
            }),
        );

        wait_for_min_peers(
            self.network.as_ref(),
            &topic,
            self.config.min_peers,
            PEER_WAIT_START,
            PEER_WAIT_LIMIT,
            false,
        )
        .await?;

        if self.config.ibft_sync_enabled {
            self.sync_history_with_retries(&share, validator_pk).await?;
        }

        info!(pubkey = %pk_hex, "validator ready");
        Ok(())
    }

    async fn sync_history_with_retries(
        &self,
        share: &Arc<Share>,
        validator_pk: &[u8],
    ) -> Result<(), NodeError> {
        let sync = HistorySync::new(
            share.clone(),
            Self::main_lambda(validator_pk),
            self.network.clone(),
            self.decided.clone(),
        );
        let mut last = None;
        for attempt in 1..=HISTORY_SYNC_RETRIES {
            match sync.sync().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "decided history sync failed");
                    last = Some(e);
                }
            }
        }
        Err(last.expect("at least one attempt ran").into())
    }

    /// Network listener: feeds consensus traffic into the broker queue and
    /// persists decided evidence directly.
    fn spawn_listener(
        &self,
        mut rx: mpsc::Receiver<ssv_types::NetworkEnvelope>,
        queue: Arc<MessageQueue>,
        share: Arc<Share>,
    ) -> JoinHandle<()> {
        let decided = self.decided.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    envelope = rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        match envelope.msg_type {
                            NetworkMsgType::Decided => {
                                handle_decided_evidence(&decided, &share, envelope.signed_message)
                            }
                            _ => queue.add(envelope),
                        }
                    }
                }
            }
        })
    }

    /// Run one duty to a decided certificate.
    ///
    /// Allocates an instance over the validator's session queue, arms the
    /// round timer, and drives the state machine until it decides, fails
    /// permanently, or the node shuts down.
    pub async fn run_duty(
        &self,
        validator_pk: &[u8],
        lambda: Lambda,
        seq_number: u64,
        input: Vec<u8>,
    ) -> Result<SignedMessage, NodeError> {
        let pk_hex = hex::encode(validator_pk);
        let session = self
            .sessions
            .read()
            .get(&pk_hex)
            .cloned()
            .ok_or(NodeError::SessionNotFound(pk_hex))?;

        let (mut instance, mut decided_rx) = Instance::new(InstanceOptions {
            share: session.share.clone(),
            queue: session.queue.clone(),
            network: self.network.clone(),
            store: self.decided.clone(),
            config: self.instance_config.clone(),
            lambda: lambda.clone(),
            seq_number,
        });
        let (mut timer, mut timeout_rx) = RoundTimer::new(
            self.instance_config.round_timeout_base,
            self.instance_config.round_timeout_max,
        );

        instance.start(input).await?;
        timer.reset(1);
        let mut poll = tokio::time::interval(INSTANCE_POLL_INTERVAL);

        let outcome: Result<(), NodeError> = 'drive: loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    instance.stop();
                    break 'drive Err(NodeError::Cancelled);
                }
                fired = timeout_rx.recv() => {
                    let Some(fired) = fired else {
                        break 'drive Err(NodeError::Cancelled);
                    };
                    if fired == instance.state().round {
                        match instance.on_round_timeout().await {
                            Ok(Some(round)) => timer.reset(round),
                            Ok(None) => {}
                            Err(e) => break 'drive Err(e.into()),
                        }
                    }
                }
                _ = poll.tick() => {
                    'pump: loop {
                        match instance.process_message().await {
                            Ok(true) => {
                                if instance.stage() == Stage::Decided {
                                    break 'pump;
                                }
                            }
                            Ok(false) => break 'pump,
                            Err(e) => break 'drive Err(e.into()),
                        }
                    }
                    if instance.stage() == Stage::Decided {
                        break 'drive Ok(());
                    }
                    match instance.process_change_round_partial_quorum().await {
                        Ok(true) => timer.reset(instance.state().round),
                        Ok(false) => {}
                        Err(e) => break 'drive Err(e.into()),
                    }
                }
            }
        };

        timer.cancel();
        metrics::record_instance_stats(&instance.stats());
        cleanup_duty(&session.queue, &lambda, seq_number, instance.state().round);
        outcome?;

        let cert = decided_rx
            .try_recv()
            .ok()
            .or_else(|| instance.decided().cloned())
            .ok_or_else(|| {
                NodeError::Instance(ssv_ibft::InstanceError::Invariant(
                    "decided stage without a certificate".into(),
                ))
            })?;
        metrics::metrics().decided_total.inc();
        Ok(cert)
    }

    /// Periodic metadata refresh; runs until cancellation.
    pub async fn run_metadata_updates(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.metadata_update_interval) => {}
            }
            if let Err(e) = update_validators_metadata(
                &self.shares,
                self.beacon.as_ref(),
                METADATA_BATCH_SIZE,
            )
            .await
            {
                warn!(error = %e, "metadata update failed");
            }
        }
    }

    /// Responder serving incoming sync stream requests from this node's
    /// decided store, capped at the configured batch size.
    pub fn sync_request_handler(&self) -> RequestHandler {
        RequestHandler::new(self.decided.clone(), self.config.max_batch_response)
    }

    /// The topic a validator's session is subscribed to, if any.
    pub fn session_topic(&self, validator_pk: &[u8]) -> Option<Topic> {
        self.sessions
            .read()
            .get(&hex::encode(validator_pk))
            .map(|s| s.topic.clone())
    }

    /// Wait until all queued validator setups finished.
    pub async fn wait_for_setups(&self) -> Vec<TaskError> {
        self.setup_queue.wait().await;
        self.setup_queue.errors()
    }
}

/// Persist a peer's decided certificate as evidence; it never re-enters a
/// running state machine.
fn handle_decided_evidence(store: &DecidedStore, share: &Share, msg: SignedMessage) {
    if msg.message.msg_type != MessageType::Commit
        || msg.signer_ids.len() < share.threshold()
        || share.verify_signed_message(&msg).is_err()
    {
        warn!(
            lambda = %msg.message.lambda,
            seq = msg.message.seq_number,
            "ignoring invalid decided message"
        );
        return;
    }
    if let Err(e) = store.save_decided(&msg) {
        warn!(error = %e, "could not persist decided evidence");
        return;
    }
    let advance = match store.get_highest(&msg.message.lambda) {
        Ok(Some(highest)) => highest.message.seq_number < msg.message.seq_number,
        Ok(None) => true,
        Err(_) => false,
    };
    if advance {
        if let Err(e) = store.save_highest(&msg) {
            warn!(error = %e, "could not advance highest decided");
        }
    }
}

/// Empty this duty's buckets once the instance released its queue.
fn cleanup_duty(queue: &MessageQueue, lambda: &Lambda, seq_number: u64, max_round: u64) {
    for round in 1..=max_round {
        for msg_type in [
            MessageType::PrePrepare,
            MessageType::Prepare,
            MessageType::Commit,
            MessageType::ChangeRound,
        ] {
            queue.purge(&ibft_index_key(lambda, seq_number, round, msg_type));
        }
    }
    queue.purge(&change_round_all_index_key(lambda, seq_number));
    queue.purge(&sig_index_key(lambda, seq_number));
}
