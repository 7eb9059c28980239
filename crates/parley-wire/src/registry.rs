//! Tracks the connections a node has handshaked.
//!
//! The [`PeerRegistry`] is a thread-safe record of every peer connection,
//! its state, and the identity it presented during the handshake.

use chrono::{DateTime, Utc};
use parley_types::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Handshake completed, fully connected.
    Connected,
    /// Connection lost; the entry is kept for inspection.
    Disconnected,
}

/// An entry representing a single peer connection.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub connection_id: ConnectionId,
    /// Node name the peer announced.
    pub node_name: String,
    /// Socket address of the peer.
    pub address: SocketAddr,
    /// Registration fingerprint the peer announced.
    pub fingerprint: String,
    pub state: PeerState,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
    /// Protocol version negotiated during handshake.
    pub protocol_version: u32,
}

/// Thread-safe registry of peer connections.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<ConnectionId, PeerEntry>>>,
}

impl PeerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a peer after a successful handshake.
    pub fn add_peer(&self, entry: PeerEntry) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(entry.connection_id, entry);
    }

    /// Remove a peer entirely.
    pub fn remove_peer(&self, id: ConnectionId) -> Option<PeerEntry> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(&id)
    }

    /// Mark a peer as disconnected (but keep its entry).
    pub fn mark_disconnected(&self, id: ConnectionId) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(&id) {
            entry.state = PeerState::Disconnected;
        }
    }

    /// Get a snapshot of a specific peer.
    pub fn get_peer(&self, id: ConnectionId) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(&id).cloned()
    }

    /// Find connected peers by announced node name.
    pub fn find_by_name(&self, node_name: &str) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected && p.node_name == node_name)
            .cloned()
            .collect()
    }

    /// Get all connected peers.
    pub fn connected_peers(&self) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .cloned()
            .collect()
    }

    /// Number of connected peers.
    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }

    /// Total number of peers (including disconnected).
    pub fn total_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_peer(name: &str) -> PeerEntry {
        PeerEntry {
            connection_id: ConnectionId::next(),
            node_name: name.to_string(),
            address: "127.0.0.1:9000".parse().unwrap(),
            fingerprint: "f00d".to_string(),
            state: PeerState::Connected,
            connected_at: Utc::now(),
            protocol_version: 1,
        }
    }

    #[test]
    fn test_add_and_get_peer() {
        let registry = PeerRegistry::new();
        let peer = make_peer("node-1");
        let id = peer.connection_id;
        registry.add_peer(peer);

        let retrieved = registry.get_peer(id).unwrap();
        assert_eq!(retrieved.node_name, "node-1");
        assert_eq!(retrieved.state, PeerState::Connected);
    }

    #[test]
    fn test_remove_peer() {
        let registry = PeerRegistry::new();
        let peer = make_peer("node-1");
        let id = peer.connection_id;
        registry.add_peer(peer);
        assert_eq!(registry.total_count(), 1);

        assert!(registry.remove_peer(id).is_some());
        assert_eq!(registry.total_count(), 0);
    }

    #[test]
    fn test_disconnect_keeps_entry() {
        let registry = PeerRegistry::new();
        let peer = make_peer("node-1");
        let id = peer.connection_id;
        registry.add_peer(peer);

        registry.mark_disconnected(id);
        assert_eq!(registry.connected_count(), 0);
        assert_eq!(registry.total_count(), 1);
        assert!(registry.find_by_name("node-1").is_empty());
    }

    #[test]
    fn test_find_by_name() {
        let registry = PeerRegistry::new();
        registry.add_peer(make_peer("alpha"));
        registry.add_peer(make_peer("alpha"));
        registry.add_peer(make_peer("beta"));

        assert_eq!(registry.find_by_name("alpha").len(), 2);
        assert_eq!(registry.connected_peers().len(), 3);
    }
}
