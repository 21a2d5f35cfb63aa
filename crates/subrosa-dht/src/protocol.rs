//! DHT Wire Protocol
//!
//! Four request/reply pairs, bincode-framed in an envelope whose rpc_id
//! matches responses to their originating request.

use serde::{Deserialize, Serialize};
use subrosa_crypto::NodeId;

use crate::error::DhtError;
use crate::node::PeerInfo;

/// Protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Request message
    Request(Request),
    /// Reply message
    Reply(Reply),
}

/// Requests a peer may issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Liveness probe
    Ping {
        /// Sender's node ID
        sender: NodeId,
    },

    /// Find the K closest known peers to a target ID
    FindNode {
        /// Sender's node ID
        sender: NodeId,
        /// Target ID to approach
        target: NodeId,
    },

    /// Find a stored value by key; misses return closest peers instead
    FindValue {
        /// Sender's node ID
        sender: NodeId,
        /// Key to look up
        key: NodeId,
    },

    /// Store a value under a key
    Store {
        /// Sender's node ID
        sender: NodeId,
        /// Key
        key: NodeId,
        /// Value
        value: Vec<u8>,
        /// Time to live in seconds
        ttl: u32,
    },
}

/// Replies to the above
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    /// Response to ping
    Pong {
        /// Responder's node ID
        sender: NodeId,
    },

    /// Closest known peers (answers FindNode, and FindValue on a miss)
    Nodes {
        /// Responder's node ID
        sender: NodeId,
        /// Up to K peers, closest first
        peers: Vec<PeerInfo>,
    },

    /// Value found
    Value {
        /// Responder's node ID
        sender: NodeId,
        /// The stored value
        value: Vec<u8>,
    },

    /// Store acknowledged (or refused)
    Ack {
        /// Responder's node ID
        sender: NodeId,
        /// Whether the value was kept
        stored: bool,
    },
}

impl Message {
    /// Get the sender ID
    pub fn sender(&self) -> NodeId {
        match self {
            Message::Request(req) => match req {
                Request::Ping { sender } => *sender,
                Request::FindNode { sender, .. } => *sender,
                Request::FindValue { sender, .. } => *sender,
                Request::Store { sender, .. } => *sender,
            },
            Message::Reply(rep) => match rep {
                Reply::Pong { sender } => *sender,
                Reply::Nodes { sender, .. } => *sender,
                Reply::Value { sender, .. } => *sender,
                Reply::Ack { sender, .. } => *sender,
            },
        }
    }
}

/// RPC ID for matching requests to responses
pub type RpcId = u64;

/// Framed message with RPC ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique RPC ID
    pub rpc_id: RpcId,
    /// The message
    pub message: Message,
}

impl Envelope {
    /// Frame a new request with a random RPC ID
    pub fn request(request: Request) -> Self {
        Self {
            rpc_id: rand::random(),
            message: Message::Request(request),
        }
    }

    /// Frame a reply echoing this envelope's RPC ID
    pub fn reply(&self, reply: Reply) -> Self {
        Self {
            rpc_id: self.rpc_id,
            message: Message::Reply(reply),
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, DhtError> {
        bincode::serialize(self).map_err(|e| DhtError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        bincode::deserialize(bytes).map_err(|e| DhtError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_id() -> NodeId {
        NodeId::from_bytes([1u8; 20])
    }

    #[test]
    fn test_message_serialization() {
        let envelope = Envelope::request(Request::FindValue {
            sender: test_id(),
            key: NodeId::from_bytes([9u8; 20]),
        });

        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.rpc_id, envelope.rpc_id);
        match decoded.message {
            Message::Request(Request::FindValue { sender, key }) => {
                assert_eq!(sender, test_id());
                assert_eq!(key, NodeId::from_bytes([9u8; 20]));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_reply_echoes_rpc_id() {
        let request = Envelope::request(Request::Ping { sender: test_id() });
        let reply = request.reply(Reply::Pong { sender: test_id() });

        assert_eq!(request.rpc_id, reply.rpc_id);
    }

    #[test]
    fn test_sender_extraction() {
        let msg = Message::Reply(Reply::Ack {
            sender: test_id(),
            stored: true,
        });
        assert_eq!(msg.sender(), test_id());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::from_bytes(&[0xde, 0xad, 0xbe]).is_err());
    }
}
