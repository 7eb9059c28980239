//! Frame layout and handshake messages.
//!
//! Every frame on a TCP connection is prefixed with a 4-byte big-endian
//! length header. The first frame in each direction is a JSON
//! [`Handshake`]; all later frames are opaque payloads owned by the layer
//! above.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Handshake messages exchanged before any payload frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Handshake {
    /// Sent by the dialing side.
    #[serde(rename = "hello")]
    Hello {
        /// Human-readable node name.
        node_name: String,
        /// Protocol version.
        protocol_version: u32,
        /// Digest of the ordered capability registration.
        fingerprint: String,
    },
    /// Acceptance from the listening side.
    #[serde(rename = "hello_ack")]
    HelloAck {
        node_name: String,
        protocol_version: u32,
        fingerprint: String,
    },
    /// Rejection.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

/// Prefix a frame body with its 4-byte big-endian length.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let len = body.len() as u32;
    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Encode a handshake message as a complete frame (length + JSON).
pub fn encode_handshake(msg: &Handshake) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    Ok(encode_frame(&json))
}

/// Parse a JSON frame body into a handshake message.
pub fn decode_handshake(body: &[u8]) -> Result<Handshake, serde_json::Error> {
    serde_json::from_slice(body)
}
