//! Beacon client interface.

use crate::error::NodeError;
use async_trait::async_trait;
use ssv_types::ValidatorMetadata;
use std::collections::HashMap;

/// The beacon node as seen from the orchestrator: the source of validator
/// metadata. Duty scheduling arrives through the same collaborator but is
/// wired per duty by the caller.
#[async_trait]
pub trait Beacon: Send + Sync {
    /// Fetch metadata for a batch of validator public keys. Keys missing
    /// from the result are unknown to the beacon chain (yet).
    async fn validator_metadata(
        &self,
        pubkeys: &[Vec<u8>],
    ) -> Result<HashMap<String, ValidatorMetadata>, NodeError>;
}
