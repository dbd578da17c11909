//! Round-change helpers: partial-quorum detection and justification.

use crate::pipeline::ValidationError;
use ssv_types::{ChangeRoundJustification, MessageError, MessageType, OperatorId, Share, SignedMessage};
use std::collections::HashMap;

/// Detect a partial quorum of change-round messages pointing past `current`.
///
/// Each signer is attributed its highest claimed round above the current
/// one. When at least `partial_threshold` signers point higher, the node
/// should bump — to the *lowest* of those per-signer rounds, which is the
/// round every member of the partial quorum has already reached.
pub fn partial_quorum_target(
    claims: &[(OperatorId, u64)],
    current: u64,
    partial_threshold: usize,
) -> Option<u64> {
    let mut highest_by_signer: HashMap<OperatorId, u64> = HashMap::new();
    for (signer, round) in claims {
        if *round <= current {
            continue;
        }
        let entry = highest_by_signer.entry(*signer).or_insert(*round);
        if *round > *entry {
            *entry = *round;
        }
    }
    if highest_by_signer.len() < partial_threshold {
        return None;
    }
    highest_by_signer.values().copied().min()
}

/// The signer/round claims carried by a set of change-round messages.
pub fn round_claims(msgs: &[SignedMessage]) -> Vec<(OperatorId, u64)> {
    msgs.iter()
        .flat_map(|m| {
            m.signer_ids
                .iter()
                .map(move |signer| (*signer, m.message.round))
        })
        .collect()
}

/// The highest justified prepared pair among a change-round quorum.
///
/// Returns `None` when no member of the quorum was prepared; the next
/// leader is then free to propose its own input.
pub fn highest_justified(
    msgs: &[SignedMessage],
) -> Result<Option<(u64, Vec<u8>)>, MessageError> {
    let mut best: Option<(u64, Vec<u8>)> = None;
    for msg in msgs {
        if msg.message.value.is_empty() {
            continue;
        }
        let justification = ChangeRoundJustification::decode(&msg.message.value)?;
        let (Some(round), Some(value)) = (
            justification.prepared_round,
            justification.prepared_value,
        ) else {
            continue;
        };
        if best.as_ref().map(|(r, _)| round > *r).unwrap_or(true) {
            best = Some((round, value));
        }
    }
    Ok(best)
}

/// Validate the prepare quorum a change-round message claims.
///
/// An unprepared justification carries nothing to check. A prepared one
/// must be backed by `2F+1` distinct signers, each with a valid prepare
/// signature over the claimed round and value at this instance's
/// coordinates.
pub fn validate_justification(
    share: &Share,
    justification: &ChangeRoundJustification,
    lambda: &ssv_types::Lambda,
    seq_number: u64,
) -> Result<(), ValidationError> {
    let (Some(prepared_round), Some(prepared_value)) = (
        justification.prepared_round,
        justification.prepared_value.as_ref(),
    ) else {
        return Ok(());
    };

    let mut signers: Vec<OperatorId> = Vec::new();
    for prepare in &justification.prepare_messages {
        let m = &prepare.message;
        if m.msg_type != MessageType::Prepare
            || m.round != prepared_round
            || &m.value != prepared_value
            || &m.lambda != lambda
            || m.seq_number != seq_number
        {
            return Err(ValidationError::BadJustification);
        }
        share
            .verify_signed_message(prepare)
            .map_err(|_| ValidationError::BadJustification)?;
        signers.extend(prepare.signer_ids.iter().copied());
    }
    signers.sort_unstable();
    signers.dedup();
    if signers.len() < share.threshold() {
        return Err(ValidationError::BadJustification);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(pairs: &[(u64, u64)]) -> Vec<(OperatorId, u64)> {
        pairs.iter().map(|(s, r)| (OperatorId(*s), *r)).collect()
    }

    // Committee of 4, partial threshold 2, mirroring how lagging nodes
    // catch up on change-round evidence.
    #[test]
    fn partial_quorum_bump_table() {
        // two signers pointing to 2 and 3 -> bump to 2
        assert_eq!(
            partial_quorum_target(&claims(&[(1, 2), (2, 3)]), 0, 2),
            Some(2)
        );

        // stale zeros ignored, both signers reach 3
        assert_eq!(
            partial_quorum_target(&claims(&[(1, 0), (2, 0), (1, 3), (2, 3)]), 1, 2),
            Some(3)
        );

        // per-signer highest: 9 (signer 1) and 8 (signer 2) -> lowest is 8
        assert_eq!(
            partial_quorum_target(
                &claims(&[
                    (1, 0),
                    (2, 0),
                    (2, 4),
                    (1, 5),
                    (2, 6),
                    (1, 7),
                    (2, 8),
                    (1, 9)
                ]),
                2,
                2
            ),
            Some(8)
        );

        // nothing above the current round -> no quorum
        assert_eq!(
            partial_quorum_target(&claims(&[(1, 0), (2, 1), (1, 2), (2, 3)]), 3, 2),
            None
        );

        // one signer is not a partial quorum
        assert_eq!(partial_quorum_target(&claims(&[(1, 10)]), 4, 2), None);

        // highest per signer: 9 (signer 1), 7 (signer 4); signers 2 and 3
        // never point above the current round
        assert_eq!(
            partial_quorum_target(
                &claims(&[
                    (1, 0),
                    (2, 0),
                    (2, 4),
                    (1, 5),
                    (3, 4),
                    (4, 7),
                    (2, 1),
                    (1, 9)
                ]),
                5,
                2
            ),
            Some(7)
        );
    }

    #[test]
    fn duplicate_signer_counts_once() {
        assert_eq!(
            partial_quorum_target(&claims(&[(1, 5), (1, 6), (1, 7)]), 1, 2),
            None
        );
    }
}
