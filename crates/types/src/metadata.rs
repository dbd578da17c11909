//! Beacon-chain metadata attached to a validator share.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validator lifecycle status as reported by the beacon node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ValidatorStatus {
    #[default]
    Unknown,
    Pending,
    Active,
    Exiting,
    Exited,
    Slashed,
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidatorStatus::Unknown => "unknown",
            ValidatorStatus::Pending => "pending",
            ValidatorStatus::Active => "active",
            ValidatorStatus::Exiting => "exiting",
            ValidatorStatus::Exited => "exited",
            ValidatorStatus::Slashed => "slashed",
        };
        write!(f, "{s}")
    }
}

/// Metadata fetched from the beacon node for a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorMetadata {
    pub index: u64,
    pub status: ValidatorStatus,
    pub activation_epoch: u64,
    pub balance: u64,
}

impl ValidatorMetadata {
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_check() {
        let meta = ValidatorMetadata {
            index: 5,
            status: ValidatorStatus::Active,
            activation_epoch: 100,
            balance: 32_000_000_000,
        };
        assert!(meta.is_active());

        let pending = ValidatorMetadata {
            status: ValidatorStatus::Pending,
            ..meta
        };
        assert!(!pending.is_active());
    }
}
