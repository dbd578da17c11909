//! IBFT consensus instance.
//!
//! One [`Instance`] runs per duty, identified by `(lambda, seq_number)`.
//! The instance is single threaded: it owns its state and pulls messages
//! from its broker queue, which network listeners fill concurrently.
//!
//! # State machine
//!
//! - `Start(input)` → round 1; the round's leader broadcasts `PrePrepare`
//! - valid `PrePrepare` → broadcast `Prepare`, move to *Prepare*
//! - `2F+1` distinct-signer `Prepare` on one value → record the prepared
//!   pair, broadcast `Commit`, move to *Commit*
//! - `2F+1` distinct-signer `Commit` on one value → aggregate the commit
//!   signatures into a decided certificate, latch *Decided*
//! - round timeout → broadcast a justified `ChangeRound`, move to
//!   *ChangeRound*; `2F+1` change-rounds re-enter via the next leader
//! - `F+1` change-rounds pointing above the current round → bump to the
//!   lowest of the signers' highest claimed rounds (partial quorum)
//!
//! Message validation runs in named pipelines; a message that fails its
//! pipeline is dropped and counted, never retried.

mod change_round;
mod config;
mod instance;
mod pipeline;
mod state;
mod timeout;

pub use change_round::{highest_justified, partial_quorum_target, validate_justification};
pub use config::InstanceConfig;
pub use instance::{Instance, InstanceError, InstanceOptions, InstanceStats};
pub use pipeline::{Pipeline, ValidationError};
pub use state::{InstanceState, Stage};
pub use timeout::RoundTimer;
