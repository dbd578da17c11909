//! Node metrics.
//!
//! Domain-specific counters rather than generic event counters; traces
//! carry the event-level detail.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use ssv_ibft::InstanceStats;
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    /// Instances that reached a decided certificate.
    pub decided_total: Counter,
    /// Messages dropped by validation pipelines.
    pub validation_drops: Counter,
    /// Rounds entered via timeout.
    pub round_changes: Counter,
    /// Rounds entered via a partial change-round quorum.
    pub partial_quorum_bumps: Counter,
    /// Validators with a stored share.
    pub validators_known: Gauge,
    /// Validators whose metadata marks them active.
    pub validators_active: Gauge,
    /// Completed metadata update batches.
    pub metadata_updates: Counter,
}

impl Metrics {
    fn new() -> Self {
        Self {
            decided_total: register_counter!(
                "ssv_instances_decided_total",
                "Instances that reached a decided certificate"
            )
            .unwrap(),
            validation_drops: register_counter!(
                "ssv_validation_drops_total",
                "Messages dropped by validation pipelines"
            )
            .unwrap(),
            round_changes: register_counter!(
                "ssv_round_changes_total",
                "Rounds entered via timeout"
            )
            .unwrap(),
            partial_quorum_bumps: register_counter!(
                "ssv_partial_quorum_bumps_total",
                "Rounds entered via a partial change-round quorum"
            )
            .unwrap(),
            validators_known: register_gauge!(
                "ssv_validators_known",
                "Validators with a stored share"
            )
            .unwrap(),
            validators_active: register_gauge!(
                "ssv_validators_active",
                "Validators whose metadata marks them active"
            )
            .unwrap(),
            metadata_updates: register_counter!(
                "ssv_metadata_update_batches_total",
                "Completed metadata update batches"
            )
            .unwrap(),
        }
    }
}

/// Process-wide metrics handle.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Fold one finished instance's counters into the node totals.
pub fn record_instance_stats(stats: &InstanceStats) {
    let m = metrics();
    m.validation_drops.inc_by(stats.validation_drops as f64);
    m.round_changes.inc_by(stats.round_changes as f64);
    m.partial_quorum_bumps
        .inc_by(stats.partial_quorum_bumps as f64);
}
