//! Registry contract synchronization.
//!
//! The registry contract is the source of truth for operators and
//! validator shares. This crate replays its event log into local state:
//! starting from a persisted offset, every event is delivered at least
//! once to a handler, and the offset only advances after a fully
//! successful batch. A second pass closes the window for events that
//! arrived while the first replay was running.

mod client;
mod events;
mod sync;

pub use client::Eth1Client;
pub use events::{Event, EventData, OperatorShare, RawLog};
pub use sync::{
    determine_sync_offset, sync_registry_events, RegistryError, RegistryEventHandler,
    DEFAULT_SYNC_OFFSET,
};
