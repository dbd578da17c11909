//! Instance configuration.

use std::time::Duration;

/// Tuning knobs for a consensus instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Round timeout for round 1; round `r` waits `base * 2^(r-1)`.
    pub round_timeout_base: Duration,
    /// Upper bound on the exponential round timeout.
    pub round_timeout_max: Duration,
    /// Largest accepted message value, in bytes.
    pub max_value_size: usize,
    /// Attempts to persist a decided certificate before giving up.
    pub persist_retries: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            round_timeout_base: Duration::from_secs(3),
            round_timeout_max: Duration::from_secs(120),
            max_value_size: 512 * 1024,
            persist_retries: 3,
        }
    }
}
