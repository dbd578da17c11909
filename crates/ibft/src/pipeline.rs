//! Message validation pipelines.
//!
//! A pipeline is a named ordered list of validators run against every
//! pulled message. The first failure wins; the caller drops the message
//! and counts it, the state machine never aborts on a validation error.

use ssv_types::{Lambda, MessageType, OperatorId, Share, SignedMessage};
use std::sync::Arc;
use thiserror::Error;

/// Why a message was dropped at the packet boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signer not part of the committee")]
    UnknownSigner,
    #[error("aggregated signature does not verify")]
    InvalidSignature,
    #[error("message lambda does not match the instance")]
    WrongLambda,
    #[error("message sequence does not match the instance")]
    WrongSequence,
    #[error("message round {got} does not match the expected {expected}")]
    WrongRound { got: u64, expected: u64 },
    #[error("unexpected message type {0}")]
    WrongType(MessageType),
    #[error("round must be at least 1")]
    ZeroRound,
    #[error("empty value")]
    EmptyValue,
    #[error("value of {got} bytes exceeds the {max} byte limit")]
    ValueTooLarge { got: usize, max: usize },
    #[error("signer {0} is not the round leader")]
    NotLeader(OperatorId),
    #[error("malformed change-round justification")]
    BadJustification,
}

type Validator = Box<dyn Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync>;

/// Named ordered list of message validators.
pub struct Pipeline {
    name: &'static str,
    validators: Vec<Validator>,
}

impl Pipeline {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            validators: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn with(
        mut self,
        validator: impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Run every validator in order; the first failure wins.
    pub fn run(&self, msg: &SignedMessage) -> Result<(), ValidationError> {
        for validator in &self.validators {
            validator(msg)?;
        }
        Ok(())
    }
}

/// Committee membership plus aggregated BLS verification.
pub fn authenticate(
    share: Arc<Share>,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        share.verify_signed_message(msg).map_err(|e| match e {
            ssv_types::ShareError::UnknownSigner(_) => ValidationError::UnknownSigner,
            _ => ValidationError::InvalidSignature,
        })
    }
}

pub fn validate_lambda(
    lambda: Lambda,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        if msg.message.lambda == lambda {
            Ok(())
        } else {
            Err(ValidationError::WrongLambda)
        }
    }
}

pub fn validate_seq(
    seq_number: u64,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        if msg.message.seq_number == seq_number {
            Ok(())
        } else {
            Err(ValidationError::WrongSequence)
        }
    }
}

pub fn validate_round(
    round: u64,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        if msg.message.round == 0 {
            return Err(ValidationError::ZeroRound);
        }
        if msg.message.round == round {
            Ok(())
        } else {
            Err(ValidationError::WrongRound {
                got: msg.message.round,
                expected: round,
            })
        }
    }
}

pub fn validate_type(
    msg_type: MessageType,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        if msg.message.msg_type == msg_type {
            Ok(())
        } else {
            Err(ValidationError::WrongType(msg.message.msg_type))
        }
    }
}

/// Non-empty value bounded by `max` bytes.
pub fn validate_value(
    max: usize,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        if msg.message.value.is_empty() {
            return Err(ValidationError::EmptyValue);
        }
        if msg.message.value.len() > max {
            return Err(ValidationError::ValueTooLarge {
                got: msg.message.value.len(),
                max,
            });
        }
        Ok(())
    }
}

/// The sole signer must be the given round leader.
pub fn validate_signer_is_leader(
    leader: OperatorId,
) -> impl Fn(&SignedMessage) -> Result<(), ValidationError> + Send + Sync {
    move |msg| {
        if msg.signer_ids.as_slice() == [leader] {
            Ok(())
        } else {
            Err(ValidationError::NotLeader(
                msg.signer_ids.first().copied().unwrap_or(OperatorId(0)),
            ))
        }
    }
}
