//! Node orchestrator.
//!
//! Wires the subsystems together for every validator this operator
//! serves: registry events create shares, the controller joins the
//! validator's topic, waits for peers, catches up on decided history, and
//! drives one consensus instance per duty. The node stays up as long as
//! at least one validator can make progress; a failing instance is
//! quarantined and retried on its next duty.

mod beacon;
mod config;
mod controller;
mod error;
mod keys;
mod metadata;
pub mod metrics;

pub use beacon::Beacon;
pub use config::{DiscoveryType, NodeConfig};
pub use controller::{ControllerOptions, ValidatorController};
pub use error::NodeError;
pub use keys::KeyManager;
pub use metadata::update_validators_metadata;
