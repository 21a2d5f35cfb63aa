//! Subrosa Distributed Hash Table
//!
//! Implements the Kademlia-style overlay node: a routing table of peer
//! contacts bucketed by XOR distance, a UDP wire protocol (ping, find-node,
//! find-value, store), iterative lookups, a TTL'd local value store, and
//! snapshot persistence. Message delivery is layered on top by addressing
//! encrypted blocks into this key space.

pub mod error;
pub mod network;
pub mod node;
pub mod persist;
pub mod protocol;
pub mod routing;
pub mod storage;

pub use error::{DhtError, DhtResult};
pub use network::{OverlayNode, RangeEstimate};
pub use node::{Contact, PeerInfo};
pub use persist::Snapshot;
pub use protocol::{Envelope, Message, Reply, Request};
pub use routing::{Insert, KBucket, RoutingTable};
pub use storage::Store;

/// Kademlia K parameter (bucket size and replication factor)
pub const K: usize = 20;

/// Alpha parameter (lookup parallelism factor)
pub const ALPHA: usize = 3;

/// Node ID bit length
pub const ID_BITS: usize = 160;

/// Number of buckets
pub const NUM_BUCKETS: usize = ID_BITS;

/// Refresh interval for idle buckets
pub const BUCKET_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Expiry time for stored values
pub const VALUE_EXPIRY_SECS: u64 = 86400;

/// Republish interval for locally held values
pub const REPUBLISH_INTERVAL_SECS: u64 = 3600;

/// Ceiling on a single stored value; callers must fragment above this
pub const MAX_VALUE_SIZE: usize = 2048;
