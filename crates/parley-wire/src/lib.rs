//! Parley Wire: the transport layer under remote method invocation.
//!
//! Provides "send a frame" and "deliver a frame" primitives per connection.
//! Frames are opaque byte vectors; the invocation core decides what they
//! contain.
//!
//! ## Architecture
//!
//! - **Connection**: one live link to a peer; sends frames reliably or best-effort
//! - **FrameHandler**: receives inbound frames and connection lifecycle events
//! - **PeerNode**: TCP listener/dialer with a version + fingerprint handshake
//! - **PeerRegistry**: tracks the peers a node is connected to
//! - **memory::pair**: two in-process endpoints, for tests and embedding

pub mod connection;
pub mod memory;
pub mod message;
pub mod peer;
pub mod registry;

pub use connection::{Connection, FrameHandler, WireError};
pub use message::{Handshake, MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use peer::{PeerConfig, PeerNode};
pub use registry::{PeerEntry, PeerRegistry, PeerState};
