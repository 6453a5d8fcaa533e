//! JSON encode/decode helpers for the pawchat frame protocol.
//!
//! Frames travel as WebSocket text messages; there is no extra framing layer
//! because the transport preserves message boundaries.

use serde::{Serialize, de::DeserializeOwned};

use crate::frame::{ClientFrame, ServerFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn encode<T: Serialize>(frame: &T) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ClientFrame`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    encode(frame)
}

/// Decodes a [`ClientFrame`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] for malformed or unknown frames.
pub fn decode_client(text: &str) -> Result<ClientFrame, CodecError> {
    decode(text)
}

/// Encodes a [`ServerFrame`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    encode(frame)
}

/// Decodes a [`ServerFrame`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] for malformed or unknown frames.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    decode(text)
}
