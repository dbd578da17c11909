//! Operator key interface.
//!
//! Key custody lives outside the node; the orchestrator only needs to
//! recognize its own operator in registry events and decrypt the share
//! secret encrypted to it.

use crate::error::NodeError;

pub trait KeyManager: Send + Sync {
    /// This operator's public key as registered on the contract.
    fn operator_pubkey(&self) -> Vec<u8>;

    /// Decrypt a share secret encrypted to this operator. Returns the raw
    /// BLS secret key bytes.
    fn decrypt_share(&self, encrypted: &[u8]) -> Result<Vec<u8>, NodeError>;
}
