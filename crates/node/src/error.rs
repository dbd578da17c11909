//! Node-level errors.

use ssv_ibft::InstanceError;
use ssv_network::{NetworkError, WaitPeersError};
use ssv_registry::RegistryError;
use ssv_storage::StoreError;
use ssv_sync::SyncError;
use ssv_types::ShareError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Peers(#[from] WaitPeersError),
    #[error("beacon client error: {0}")]
    Beacon(String),
    #[error("key manager error: {0}")]
    Keys(String),
    #[error("no share stored for validator {0}")]
    ShareNotFound(String),
    #[error("validator {0} has no running session")]
    SessionNotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cancelled")]
    Cancelled,
}
