//! Contract client interface.

use crate::events::Event;
use crate::sync::RegistryError;
use async_trait::async_trait;
use ssv_tasks::Subject;
use std::sync::Arc;

/// The eth1 contract client as seen from the synchronizer.
///
/// Events — both replayed history and live ones — arrive through the
/// client's event subject.
#[async_trait]
pub trait Eth1Client: Send + Sync {
    /// The subject on which the client publishes contract events.
    fn events_subject(&self) -> Arc<Subject<Event>>;

    /// Replay contract history from `from_block` to the current head,
    /// publishing each event on the subject and finishing with a
    /// `SyncEnded` event. Returns once the replay is complete.
    async fn sync_history(&self, from_block: u64) -> Result<(), RegistryError>;

    /// The current chain head block number.
    async fn current_block(&self) -> Result<u64, RegistryError>;
}
