//! The consensus instance.

use crate::change_round::{highest_justified, partial_quorum_target, round_claims};
use crate::config::InstanceConfig;
use crate::pipeline::{
    authenticate, validate_lambda, validate_round, validate_seq, validate_signer_is_leader,
    validate_type, validate_value, Pipeline, ValidationError,
};
use crate::state::{InstanceState, Stage};
use ssv_broker::{change_round_all_index_key, ibft_index_key, MessageQueue};
use ssv_network::{Network, NetworkError, Topic};
use ssv_storage::{DecidedStore, StoreError};
use ssv_types::{
    ChangeRoundJustification, Lambda, Message, MessageError, MessageType, NetworkEnvelope,
    NetworkMsgType, OperatorId, Share, ShareError, SignedMessage,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors that abort an instance. Validation failures never appear here;
/// they are dropped at the packet boundary and counted in the stats.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance has no share key to sign with")]
    MissingShareKey,
    #[error("instance already started")]
    AlreadyStarted,
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error("persisting decided failed after {attempts} attempts")]
    Persistence {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("state inconsistency: {0}")]
    Invariant(String),
}

/// Counters exposed to the orchestrator and metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceStats {
    /// Messages dropped by a validation pipeline.
    pub validation_drops: u64,
    /// Rounds entered via timeout.
    pub round_changes: u64,
    /// Rounds entered via a partial quorum of change-round messages.
    pub partial_quorum_bumps: u64,
}

/// Everything an instance needs at construction.
pub struct InstanceOptions {
    pub share: Arc<Share>,
    pub queue: Arc<MessageQueue>,
    pub network: Arc<dyn Network>,
    pub store: Arc<DecidedStore>,
    pub config: InstanceConfig,
    pub lambda: Lambda,
    pub seq_number: u64,
}

/// A per-duty consensus instance.
///
/// Owned and driven by a single task; network listeners only ever touch
/// the broker queue it pulls from.
pub struct Instance {
    share: Arc<Share>,
    queue: Arc<MessageQueue>,
    network: Arc<dyn Network>,
    store: Arc<DecidedStore>,
    config: InstanceConfig,
    topic: Topic,
    state: InstanceState,
    prepare_container: HashMap<u64, Vec<SignedMessage>>,
    commit_container: HashMap<u64, Vec<SignedMessage>>,
    change_round_container: HashMap<u64, Vec<SignedMessage>>,
    decided_cert: Option<SignedMessage>,
    decided_tx: mpsc::UnboundedSender<SignedMessage>,
    stats: InstanceStats,
}

impl Instance {
    /// Build an instance. Decided certificates are emitted exactly once on
    /// the returned channel.
    pub fn new(opts: InstanceOptions) -> (Self, mpsc::UnboundedReceiver<SignedMessage>) {
        let (decided_tx, decided_rx) = mpsc::unbounded_channel();
        let topic = Topic::validator(&opts.share.validator_pk.to_bytes());
        let state = InstanceState::new(opts.lambda, opts.seq_number);
        (
            Self {
                share: opts.share,
                queue: opts.queue,
                network: opts.network,
                store: opts.store,
                config: opts.config,
                topic,
                state,
                prepare_container: HashMap::new(),
                commit_container: HashMap::new(),
                change_round_container: HashMap::new(),
                decided_cert: None,
                decided_tx,
                stats: InstanceStats::default(),
            },
            decided_rx,
        )
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    pub fn stats(&self) -> InstanceStats {
        self.stats
    }

    /// The decided certificate, once latched.
    pub fn decided(&self) -> Option<&SignedMessage> {
        self.decided_cert.as_ref()
    }

    /// Force the current round. Used when replaying change-round state
    /// after a restart; ordinary operation moves rounds through timeouts
    /// and quorums.
    pub fn set_round(&mut self, round: u64) {
        self.state.round = round;
    }

    /// Leader rotation: `(seq_number + round) mod n + 1`.
    pub fn leader_for(&self, round: u64) -> OperatorId {
        let n = self.share.committee_size() as u64;
        OperatorId((self.state.seq_number + round) % n + 1)
    }

    fn is_leader(&self, round: u64) -> bool {
        self.leader_for(round) == self.share.node_id
    }

    /// Start the instance with the value this node would propose.
    pub async fn start(&mut self, input_value: Vec<u8>) -> Result<(), InstanceError> {
        if self.state.stage != Stage::NotStarted {
            return Err(InstanceError::AlreadyStarted);
        }
        self.state.round = 1;
        self.state.input_value = Some(input_value.clone());
        self.state.stage = Stage::PrePrepare;

        info!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            leader = %self.leader_for(1),
            "instance started"
        );

        if self.is_leader(1) {
            self.broadcast_consensus(MessageType::PrePrepare, 1, input_value.clone())
                .await?;
            // The leader takes its own proposal as received.
            self.broadcast_consensus(MessageType::Prepare, 1, input_value)
                .await?;
            self.state.stage = Stage::Prepare;
        }
        Ok(())
    }

    /// Mark the instance stopped; later pulls are no-ops.
    pub fn stop(&mut self) {
        if self.state.stage != Stage::Decided {
            self.state.stage = Stage::Stopped;
        }
    }

    /// Pull and process one message for the current stage.
    ///
    /// Returns whether a message was consumed (processed or dropped).
    pub async fn process_message(&mut self) -> Result<bool, InstanceError> {
        let (msg_type, expect_leader) = match self.state.stage {
            Stage::NotStarted | Stage::Decided | Stage::Stopped => return Ok(false),
            Stage::PrePrepare => (MessageType::PrePrepare, true),
            Stage::Prepare => (MessageType::Prepare, false),
            Stage::Commit => (MessageType::Commit, false),
            Stage::ChangeRound => (MessageType::ChangeRound, false),
        };

        let key = ibft_index_key(
            &self.state.lambda,
            self.state.seq_number,
            self.state.round,
            msg_type,
        );
        let Some(envelope) = self.queue.pop(&key) else {
            return Ok(false);
        };
        let msg = envelope.signed_message;

        if let Err(reason) = self.pipeline_for(msg_type, expect_leader).run(&msg) {
            self.drop_message(&msg, reason);
            return Ok(true);
        }

        match msg_type {
            MessageType::PrePrepare => self.upon_pre_prepare(msg).await?,
            MessageType::Prepare => self.upon_prepare(msg).await?,
            MessageType::Commit => self.upon_commit(msg).await?,
            MessageType::ChangeRound => self.upon_change_round(msg).await?,
            MessageType::Decided => {
                return Err(InstanceError::Invariant(
                    "decided messages never enter the stage pipeline".into(),
                ))
            }
        }
        Ok(true)
    }

    /// Round timeout: move to the next round and broadcast a justified
    /// change-round. Returns the new round so the caller can re-arm the
    /// timer, or `None` when the instance already terminated.
    pub async fn on_round_timeout(&mut self) -> Result<Option<u64>, InstanceError> {
        if matches!(self.state.stage, Stage::Decided | Stage::Stopped) {
            return Ok(None);
        }
        self.state.round += 1;
        self.state.stage = Stage::ChangeRound;
        self.stats.round_changes += 1;

        let round = self.state.round;
        debug!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            round,
            "round timed out, changing round"
        );
        self.broadcast_change_round(round).await?;
        Ok(Some(round))
    }

    /// Run the partial-quorum pipeline over the broad change-round bucket.
    ///
    /// When `F+1` distinct signers claim rounds above the current one, bump
    /// to the lowest of their highest claimed rounds, purge the bucket so
    /// the same evidence cannot trigger twice, and rebroadcast our own
    /// change-round at the new round. Returns whether a bump happened.
    pub async fn process_change_round_partial_quorum(&mut self) -> Result<bool, InstanceError> {
        if matches!(self.state.stage, Stage::Decided | Stage::Stopped) {
            return Ok(false);
        }
        let bucket_key = change_round_all_index_key(&self.state.lambda, self.state.seq_number);
        let snapshot = self.queue.peek_all(&bucket_key);
        if snapshot.is_empty() {
            return Ok(false);
        }

        let pipeline = Pipeline::new("change-round-partial-quorum")
            .with(authenticate(self.share.clone()))
            .with(validate_lambda(self.state.lambda.clone()))
            .with(validate_seq(self.state.seq_number))
            .with(validate_type(MessageType::ChangeRound));

        let mut valid = Vec::new();
        for envelope in snapshot.into_values() {
            let msg = envelope.signed_message;
            match pipeline.run(&msg) {
                Ok(()) => valid.push(msg),
                Err(reason) => self.drop_message(&msg, reason),
            }
        }

        let Some(target) = partial_quorum_target(
            &round_claims(&valid),
            self.state.round,
            self.share.partial_threshold(),
        ) else {
            return Ok(false);
        };

        // Purge before rebroadcasting: stale evidence must not re-trigger.
        self.queue.purge(&bucket_key);

        info!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            from = self.state.round,
            to = target,
            "partial change-round quorum, bumping round"
        );
        self.state.round = target;
        self.state.stage = Stage::ChangeRound;
        self.stats.partial_quorum_bumps += 1;
        self.broadcast_change_round(target).await?;
        Ok(true)
    }

    // ── Stage handlers ─────────────────────────────────────────────────

    async fn upon_pre_prepare(&mut self, msg: SignedMessage) -> Result<(), InstanceError> {
        let value = msg.message.value.clone();
        debug!(
            lambda = %self.state.lambda,
            round = self.state.round,
            leader = %self.leader_for(self.state.round),
            "valid pre-prepare, broadcasting prepare"
        );
        self.broadcast_consensus(MessageType::Prepare, self.state.round, value)
            .await?;
        self.state.stage = Stage::Prepare;
        Ok(())
    }

    async fn upon_prepare(&mut self, msg: SignedMessage) -> Result<(), InstanceError> {
        let round = self.state.round;
        let value = msg.message.value.clone();
        if !add_unique(&mut self.prepare_container, round, msg) {
            return Ok(());
        }

        let quorum = signers_for_value(
            self.prepare_container.get(&round).map_or(&[][..], |v| v.as_slice()),
            &value,
        );
        if quorum.len() < self.share.threshold() {
            return Ok(());
        }

        info!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            round,
            signers = quorum.len(),
            "prepare quorum, broadcasting commit"
        );
        self.state.prepared_round = Some(round);
        self.state.prepared_value = Some(value.clone());
        self.broadcast_consensus(MessageType::Commit, round, value)
            .await?;
        self.state.stage = Stage::Commit;
        Ok(())
    }

    async fn upon_commit(&mut self, msg: SignedMessage) -> Result<(), InstanceError> {
        let round = self.state.round;
        let value = msg.message.value.clone();
        if !add_unique(&mut self.commit_container, round, msg) {
            return Ok(());
        }

        let matching: Vec<SignedMessage> = self
            .commit_container
            .get(&round)
            .map_or(&[][..], |v| v.as_slice())
            .iter()
            .filter(|m| m.message.value == value)
            .cloned()
            .collect();
        let quorum = signers_for_value(&matching, &value);
        if quorum.len() < self.share.threshold() {
            return Ok(());
        }

        let cert = aggregate_commits(&matching)?;
        self.state.stage = Stage::Decided;
        self.decided_cert = Some(cert.clone());

        info!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            round,
            signers = ?cert.signer_ids,
            "commit quorum, instance decided"
        );

        self.persist_decided(&cert)?;
        self.network
            .broadcast(
                &self.topic,
                NetworkEnvelope::new(NetworkMsgType::Decided, cert.clone()),
            )
            .await?;

        // The channel is per-instance and latching on the stage guarantees
        // a single emission.
        let _ = self.decided_tx.send(cert);
        Ok(())
    }

    async fn upon_change_round(&mut self, msg: SignedMessage) -> Result<(), InstanceError> {
        // The claimed prepare quorum must decode and verify before the
        // message counts towards any quorum.
        if !msg.message.value.is_empty() {
            let check = ChangeRoundJustification::decode(&msg.message.value)
                .map_err(|_| ValidationError::BadJustification)
                .and_then(|justification| {
                    crate::change_round::validate_justification(
                        &self.share,
                        &justification,
                        &self.state.lambda,
                        self.state.seq_number,
                    )
                });
            if let Err(reason) = check {
                self.drop_message(&msg, reason);
                return Ok(());
            }
        }

        let round = self.state.round;
        if !add_unique(&mut self.change_round_container, round, msg) {
            return Ok(());
        }

        let msgs = self
            .change_round_container
            .get(&round)
            .map_or(&[][..], |v| v.as_slice());
        let signers = distinct_signers(msgs);
        if signers.len() < self.share.threshold() {
            return Ok(());
        }

        let justified = highest_justified(msgs)?;
        info!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            round,
            prepared = justified.is_some(),
            "change-round quorum"
        );

        if self.is_leader(round) {
            let value = match justified {
                Some((_, value)) => value,
                None => self
                    .state
                    .input_value
                    .clone()
                    .ok_or_else(|| InstanceError::Invariant("leading without an input value".into()))?,
            };
            self.broadcast_consensus(MessageType::PrePrepare, round, value.clone())
                .await?;
            self.broadcast_consensus(MessageType::Prepare, round, value)
                .await?;
            self.state.stage = Stage::Prepare;
        } else {
            self.state.stage = Stage::PrePrepare;
        }
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn pipeline_for(&self, msg_type: MessageType, expect_leader: bool) -> Pipeline {
        let mut pipeline = Pipeline::new(match msg_type {
            MessageType::PrePrepare => "pre-prepare",
            MessageType::Prepare => "prepare",
            MessageType::Commit => "commit",
            MessageType::ChangeRound => "change-round",
            MessageType::Decided => "decided",
        })
        .with(authenticate(self.share.clone()))
        .with(validate_lambda(self.state.lambda.clone()))
        .with(validate_seq(self.state.seq_number))
        .with(validate_round(self.state.round))
        .with(validate_type(msg_type));

        if msg_type != MessageType::ChangeRound {
            pipeline = pipeline.with(validate_value(self.config.max_value_size));
        }
        if expect_leader {
            pipeline = pipeline.with(validate_signer_is_leader(self.leader_for(self.state.round)));
        }
        pipeline
    }

    fn drop_message(&mut self, msg: &SignedMessage, reason: ValidationError) {
        self.stats.validation_drops += 1;
        debug!(
            lambda = %self.state.lambda,
            seq = self.state.seq_number,
            msg_round = msg.message.round,
            signers = ?msg.signer_ids,
            %reason,
            "dropping message"
        );
    }

    fn sign_message(
        &self,
        msg_type: MessageType,
        round: u64,
        value: Vec<u8>,
    ) -> Result<SignedMessage, InstanceError> {
        let key = self
            .share
            .share_key
            .as_ref()
            .ok_or(InstanceError::MissingShareKey)?;
        let message = Message {
            msg_type,
            round,
            lambda: self.state.lambda.clone(),
            seq_number: self.state.seq_number,
            value,
        };
        let signature = key.sign(&message.signing_root());
        Ok(SignedMessage::new(message, signature, self.share.node_id))
    }

    async fn broadcast_consensus(
        &self,
        msg_type: MessageType,
        round: u64,
        value: Vec<u8>,
    ) -> Result<SignedMessage, InstanceError> {
        let signed = self.sign_message(msg_type, round, value)?;
        self.network
            .broadcast(
                &self.topic,
                NetworkEnvelope::new(NetworkMsgType::Ibft, signed.clone()),
            )
            .await?;
        Ok(signed)
    }

    async fn broadcast_change_round(&mut self, round: u64) -> Result<(), InstanceError> {
        let justification = ChangeRoundJustification {
            prepared_round: self.state.prepared_round,
            prepared_value: self.state.prepared_value.clone(),
            prepare_messages: match (self.state.prepared_round, &self.state.prepared_value) {
                (Some(prepared_round), Some(value)) => self
                    .prepare_container
                    .get(&prepared_round)
                    .map_or(&[][..], |v| v.as_slice())
                    .iter()
                    .filter(|m| &m.message.value == value)
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            },
        };
        let signed = self
            .broadcast_consensus(MessageType::ChangeRound, round, justification.encode()?)
            .await?;
        if let Err(e) = self.store.save_last_change_round(&signed) {
            warn!(error = %e, "could not persist last change-round message");
        }
        Ok(())
    }

    fn persist_decided(&self, cert: &SignedMessage) -> Result<(), InstanceError> {
        let attempts = self.config.persist_retries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.save_decided_once(cert) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "persisting decided failed");
                    last_err = Some(e);
                }
            }
        }
        Err(InstanceError::Persistence {
            attempts,
            source: last_err.unwrap_or_else(|| StoreError::Database("unreachable".into())),
        })
    }

    fn save_decided_once(&self, cert: &SignedMessage) -> Result<(), StoreError> {
        self.store.save_decided(cert)?;
        let is_higher = match self.store.get_highest(&self.state.lambda)? {
            Some(highest) => highest.message.seq_number < cert.message.seq_number,
            None => true,
        };
        if is_higher {
            self.store.save_highest(cert)?;
        }
        Ok(())
    }
}

/// Add a message to a per-round container unless one of its signers is
/// already represented there. Returns whether it was added.
fn add_unique(
    container: &mut HashMap<u64, Vec<SignedMessage>>,
    round: u64,
    msg: SignedMessage,
) -> bool {
    let bucket = container.entry(round).or_default();
    if bucket.iter().any(|m| m.signers_intersect(&msg.signer_ids)) {
        return false;
    }
    bucket.push(msg);
    true
}

/// Distinct signers among messages carrying the given value.
fn signers_for_value(msgs: &[SignedMessage], value: &[u8]) -> Vec<OperatorId> {
    let mut signers: Vec<OperatorId> = msgs
        .iter()
        .filter(|m| m.message.value == value)
        .flat_map(|m| m.signer_ids.iter().copied())
        .collect();
    signers.sort_unstable();
    signers.dedup();
    signers
}

/// Distinct signers among all messages.
fn distinct_signers(msgs: &[SignedMessage]) -> Vec<OperatorId> {
    let mut signers: Vec<OperatorId> = msgs
        .iter()
        .flat_map(|m| m.signer_ids.iter().copied())
        .collect();
    signers.sort_unstable();
    signers.dedup();
    signers
}

/// Aggregate a commit quorum into a decided certificate.
fn aggregate_commits(msgs: &[SignedMessage]) -> Result<SignedMessage, InstanceError> {
    let mut iter = msgs.iter();
    let mut cert = iter
        .next()
        .ok_or_else(|| InstanceError::Invariant("empty commit quorum".into()))?
        .clone();
    for msg in iter {
        cert.aggregate(msg)?;
    }
    Ok(cert)
}
