//! Peer Contact Information

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use subrosa_crypto::NodeId;

/// The gossiped form of a peer: what find-node replies carry on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer's identifier in the overlay key space
    pub node_id: NodeId,

    /// Peer's UDP address
    pub addr: SocketAddr,
}

/// A known peer as tracked by the routing table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    /// Peer's identifier
    pub node_id: NodeId,

    /// Peer's UDP address
    pub addr: SocketAddr,

    /// Unix timestamp of the last time this peer was heard from
    pub last_seen: u64,
}

impl Contact {
    /// Create a contact seen just now
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self {
            node_id,
            addr,
            last_seen: current_timestamp(),
        }
    }

    /// Restore a contact with an explicit last-seen timestamp
    pub fn with_last_seen(node_id: NodeId, addr: SocketAddr, last_seen: u64) -> Self {
        Self {
            node_id,
            addr,
            last_seen,
        }
    }

    /// Update last seen to now
    pub fn touch(&mut self) {
        self.last_seen = current_timestamp();
    }

    /// The wire form of this contact
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            node_id: self.node_id,
            addr: self.addr,
        }
    }
}

impl From<PeerInfo> for Contact {
    fn from(info: PeerInfo) -> Self {
        Self::new(info.node_id, info.addr)
    }
}

/// Seconds since the Unix epoch
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
