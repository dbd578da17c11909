//! Durable stores for the SSV operator node.
//!
//! Everything persists through the [`Database`] trait, a minimal
//! prefix-scoped key-value interface. Production uses RocksDB; tests use
//! the in-memory backend. The typed stores on top own their key layout:
//!
//! - [`ShareStore`]: `share-` — validator shares keyed by validator pubkey
//! - [`SyncOffsetStore`]: `sync-offset` — last processed contract block
//! - [`DecidedStore`]: `decided-{lambda}-{seq}` plus `highest-known-{lambda}`

mod db;
mod decided;
mod offset;
mod rocks;
mod shares;

pub use db::{Database, MemDb, StoreError};
pub use decided::DecidedStore;
pub use offset::SyncOffsetStore;
pub use rocks::RocksDb;
pub use shares::ShareStore;
