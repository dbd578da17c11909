//! Validator metadata updates.

use crate::beacon::Beacon;
use crate::error::NodeError;
use crate::metrics;
use ssv_storage::ShareStore;
use tracing::{debug, info, warn};

/// Batch size for beacon metadata queries.
pub const METADATA_BATCH_SIZE: usize = 25;

/// Fetch fresh metadata for every stored validator and write it back to
/// the share store. Returns how many validators were updated.
pub async fn update_validators_metadata(
    shares: &ShareStore,
    beacon: &dyn Beacon,
    batch_size: usize,
) -> Result<usize, NodeError> {
    let all = shares.list()?;
    metrics::metrics().validators_known.set(all.len() as f64);
    if all.is_empty() {
        return Ok(0);
    }

    let pubkeys: Vec<Vec<u8>> = all
        .iter()
        .map(|s| s.validator_pk.to_bytes().to_vec())
        .collect();

    let mut updated = 0usize;
    let mut active = 0usize;
    for batch in pubkeys.chunks(batch_size.max(1)) {
        let fetched = match beacon.validator_metadata(batch).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "metadata batch failed, skipping");
                continue;
            }
        };
        for (pk_hex, meta) in fetched {
            if meta.is_active() {
                active += 1;
            }
            debug!(pubkey = %pk_hex, status = %meta.status, index = meta.index, "validator status");
            shares.update_metadata(&pk_hex, meta)?;
            updated += 1;
        }
        metrics::metrics().metadata_updates.inc();
    }
    metrics::metrics().validators_active.set(active as f64);

    info!(total = all.len(), updated, "validator metadata updated");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ssv_storage::MemDb;
    use ssv_types::test_utils::{test_keys, test_share_for};
    use ssv_types::{ValidatorMetadata, ValidatorStatus};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Beacon stub that marks every queried validator active.
    struct AllActive;

    #[async_trait]
    impl Beacon for AllActive {
        async fn validator_metadata(
            &self,
            pubkeys: &[Vec<u8>],
        ) -> Result<HashMap<String, ValidatorMetadata>, NodeError> {
            Ok(pubkeys
                .iter()
                .enumerate()
                .map(|(i, pk)| {
                    (
                        hex::encode(pk),
                        ValidatorMetadata {
                            index: i as u64,
                            status: ValidatorStatus::Active,
                            activation_epoch: 0,
                            balance: 32_000_000_000,
                        },
                    )
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn updates_every_stored_share() {
        let shares = ShareStore::new(Arc::new(MemDb::new()));
        for _ in 0..3 {
            shares.save(&test_share_for(1, &test_keys(4))).unwrap();
        }

        let updated = update_validators_metadata(&shares, &AllActive, 2)
            .await
            .unwrap();
        assert_eq!(updated, 3);

        for share in shares.list().unwrap() {
            let meta = share.metadata.expect("metadata set");
            assert!(meta.is_active());
        }
    }

    #[tokio::test]
    async fn empty_store_is_a_noop() {
        let shares = ShareStore::new(Arc::new(MemDb::new()));
        let updated = update_validators_metadata(&shares, &AllActive, 25)
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }
}
