//! Network boundary of the node.
//!
//! The gossip transport itself is an external collaborator; this crate
//! defines everything the rest of the node needs to talk to it: topic
//! naming, the wire codec, the sync stream request/response frames, the
//! [`Network`] trait, and the min-peers wait used before joining
//! consensus for a validator.

mod codec;
mod messages;
mod peers;
mod topics;
mod traits;

pub use codec::{
    decode_envelope, decode_sync_frame, encode_envelope, encode_sync_frame, CodecError,
    SYNC_PROTOCOL_ID, WIRE_VERSION,
};
pub use messages::{SyncRequest, SyncRequestKind, SyncResponse};
pub use peers::{wait_for_min_peers, WaitPeersError};
pub use topics::Topic;
pub use traits::{Network, NetworkError, PeerId};
