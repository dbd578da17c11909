//! Decided-history synchronization.
//!
//! A node that falls behind on a validator's decided sequence catches up
//! directly from its peers over the dedicated sync stream: it asks a
//! subset of topic peers for their highest decided certificate, picks the
//! maximum advertised height, and pulls the missing range in capped
//! batches. Every certificate is quorum-verified before it is persisted;
//! a peer serving a bad batch is dropped and the batch is refetched from
//! another.
//!
//! The [`RequestHandler`] is the serving side of the same protocol.

mod history;
mod responder;

pub use history::{HistorySync, SyncError};
pub use responder::RequestHandler;
