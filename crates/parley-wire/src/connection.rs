//! Connection and handler traits shared by every transport.

use async_trait::async_trait;
use parley_types::{ConnectionId, TransportKind};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Capability registration mismatch: local={local}, remote={remote}")]
    FingerprintMismatch { local: String, remote: String },
}

/// One live link to a remote peer.
///
/// Implementations must be cheap to share: the invocation core keeps
/// `Arc<dyn Connection>` handles in proxies and pending calls, and keys its
/// caches by [`Connection::id`].
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Stable identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Human-readable description of the remote end.
    fn peer(&self) -> &str;

    /// Send one frame. Unreliable frames may be silently dropped.
    async fn send(&self, frame: Vec<u8>, kind: TransportKind) -> Result<(), WireError>;

    fn is_open(&self) -> bool;

    /// Close the connection. Both ends observe `disconnected`.
    fn close(&self);
}

/// Receives inbound frames and lifecycle events for connections.
///
/// `frame_received` runs on the connection's inbound path and must never
/// wait on other frames of the same connection, or bidirectional calls
/// would deadlock.
pub trait FrameHandler: Send + Sync + 'static {
    /// A connection finished its handshake and may carry frames.
    fn connected(&self, _conn: &Arc<dyn Connection>) {}

    /// A frame arrived. Frames of one connection arrive in order.
    fn frame_received(&self, conn: &Arc<dyn Connection>, frame: Vec<u8>);

    /// The connection is gone; no further frames will arrive on it.
    fn disconnected(&self, _conn: &Arc<dyn Connection>) {}
}
