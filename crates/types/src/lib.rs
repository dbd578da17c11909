//! Core types for the SSV operator node.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Primitives**: operator ids, instance identifiers, BLS keys and signatures
//! - **Consensus messages**: `Message`, `SignedMessage`, change-round justification
//! - **Share model**: a validator's threshold share plus its operator committee
//! - **Validator metadata**: beacon-chain status attached to a share
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crates, making it the foundation layer. Anything that touches the network,
//! storage, or the consensus engine builds on top of these types.

pub mod bls;
mod identifiers;
mod message;
mod metadata;
mod share;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bls::{BlsKeyPair, BlsPublicKey, BlsSecretKey, BlsSignature, CryptoError};
pub use identifiers::{Lambda, OperatorId};
pub use message::{
    ChangeRoundJustification, Message, MessageError, MessageType, NetworkEnvelope, NetworkMsgType,
    SignedMessage,
};
pub use metadata::{ValidatorMetadata, ValidatorStatus};
pub use share::{CommitteeMember, PubKeys, Share, ShareError, ShareOptions};
