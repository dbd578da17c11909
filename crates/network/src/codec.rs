//! Message encoding for transport.
//!
//! # Wire format
//!
//! Gossip: `[version: u8][payload: bincode-encoded NetworkEnvelope]`.
//!
//! Sync stream (`/sync/0.0.1`): one request, one response, each framed as
//! `[len: u32 BE][version: u8][payload]`.

use serde::{de::DeserializeOwned, Serialize};
use ssv_types::NetworkEnvelope;
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Protocol id of the direct sync stream.
pub const SYNC_PROTOCOL_ID: &str = "/sync/0.0.1";

/// Maximum accepted frame payload, guarding against hostile length prefixes.
const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),
    #[error("message too short")]
    MessageTooShort,
    #[error("frame length {0} exceeds maximum")]
    FrameTooLarge(usize),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

fn encode_versioned<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))?;
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    Ok(bytes)
}

fn decode_versioned<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    if data[0] != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(data[0]));
    }
    bincode::deserialize(&data[1..]).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode a gossip envelope to wire format.
pub fn encode_envelope(envelope: &NetworkEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_versioned(envelope)
}

/// Decode a gossip envelope from wire format.
pub fn decode_envelope(data: &[u8]) -> Result<NetworkEnvelope, CodecError> {
    decode_versioned(data)
}

fn encode_frame_inner(versioned: Vec<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + versioned.len());
    frame.extend_from_slice(&(versioned.len() as u32).to_be_bytes());
    frame.extend(versioned);
    frame
}

fn split_frame(data: &[u8]) -> Result<&[u8], CodecError> {
    if data.len() < 4 {
        return Err(CodecError::MessageTooShort);
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }
    if data.len() < 4 + len {
        return Err(CodecError::MessageTooShort);
    }
    Ok(&data[4..4 + len])
}

/// Encode a length-prefixed sync request frame.
pub fn encode_sync_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(encode_frame_inner(encode_versioned(value)?))
}

/// Decode a length-prefixed sync frame.
pub fn decode_sync_frame<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    decode_versioned(split_frame(data)?)
}
