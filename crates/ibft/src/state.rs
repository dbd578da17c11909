//! Instance state.

use ssv_types::Lambda;
use std::fmt;

/// Stage of a consensus instance. Only the owning instance mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    PrePrepare,
    Prepare,
    Commit,
    ChangeRound,
    Decided,
    Stopped,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::NotStarted => "not-started",
            Stage::PrePrepare => "pre-prepare",
            Stage::Prepare => "prepare",
            Stage::Commit => "commit",
            Stage::ChangeRound => "change-round",
            Stage::Decided => "decided",
            Stage::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Mutable state of one instance.
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub lambda: Lambda,
    pub seq_number: u64,
    /// Current round, monotone, ≥ 1 once started.
    pub round: u64,
    pub stage: Stage,
    /// Round at which this node last collected a prepare quorum.
    pub prepared_round: Option<u64>,
    /// Value backed by that prepare quorum.
    pub prepared_value: Option<Vec<u8>>,
    /// The value this node proposes when it leads.
    pub input_value: Option<Vec<u8>>,
}

impl InstanceState {
    pub fn new(lambda: Lambda, seq_number: u64) -> Self {
        Self {
            lambda,
            seq_number,
            round: 0,
            stage: Stage::NotStarted,
            prepared_round: None,
            prepared_value: None,
            input_value: None,
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared_round.is_some() && self.prepared_value.is_some()
    }
}
