//! Snapshot Persistence
//!
//! Periodically the node serializes its routing table contacts and locally
//! held entries to disk, so a restart resumes with a warm table instead of
//! a cold bootstrap. The file format is versioned and schema-tagged: a
//! four-byte magic, a format version, then a bincode body. Losing the state
//! written since the last snapshot is accepted; a torn file is not, hence
//! the write-to-temp-then-rename dance.

use std::path::Path;

use serde::{Deserialize, Serialize};
use subrosa_crypto::NodeId;
use tracing::info;

use crate::error::{DhtError, DhtResult};
use crate::node::Contact;
use crate::storage::Entry;

/// File magic
const MAGIC: &[u8; 4] = b"SBRS";

/// Current snapshot format version
const VERSION: u16 = 1;

/// A persisted contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SavedContact {
    node_id: NodeId,
    addr: std::net::SocketAddr,
    last_seen: u64,
}

/// A persisted store entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SavedEntry {
    key: NodeId,
    value: Vec<u8>,
    stored_at: u64,
    expires_at: u64,
}

/// Point-in-time copy of a node's routing table and local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    node_id: NodeId,
    contacts: Vec<SavedContact>,
    entries: Vec<SavedEntry>,
}

impl Snapshot {
    /// Build a snapshot from live state
    pub fn capture<'a>(
        node_id: NodeId,
        contacts: Vec<Contact>,
        entries: impl Iterator<Item = (&'a NodeId, &'a Entry)>,
    ) -> Self {
        Self {
            node_id,
            contacts: contacts
                .into_iter()
                .map(|c| SavedContact {
                    node_id: c.node_id,
                    addr: c.addr,
                    last_seen: c.last_seen,
                })
                .collect(),
            entries: entries
                .map(|(key, e)| SavedEntry {
                    key: *key,
                    value: e.value.clone(),
                    stored_at: e.stored_at,
                    expires_at: e.expires_at,
                })
                .collect(),
        }
    }

    /// The node ID this snapshot belongs to
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Restore the persisted contacts
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts
            .iter()
            .map(|c| Contact::with_last_seen(c.node_id, c.addr, c.last_seen))
            .collect()
    }

    /// Consume the snapshot, yielding the persisted entries
    pub fn into_entries(self) -> Vec<(NodeId, Entry)> {
        self.entries
            .into_iter()
            .map(|e| {
                (
                    e.key,
                    Entry {
                        value: e.value,
                        stored_at: e.stored_at,
                        expires_at: e.expires_at,
                    },
                )
            })
            .collect()
    }

    /// Serialize with magic and version header
    pub fn to_bytes(&self) -> DhtResult<Vec<u8>> {
        let body =
            bincode::serialize(self).map_err(|e| DhtError::Serialization(e.to_string()))?;

        let mut bytes = Vec::with_capacity(body.len() + 6);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse, rejecting unknown magic or versions
    pub fn from_bytes(bytes: &[u8]) -> DhtResult<Self> {
        if bytes.len() < 6 {
            return Err(DhtError::InvalidSnapshot("file too short".into()));
        }
        if &bytes[..4] != MAGIC {
            return Err(DhtError::InvalidSnapshot("bad magic".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(DhtError::InvalidSnapshot(format!(
                "unsupported version {}",
                version
            )));
        }

        bincode::deserialize(&bytes[6..]).map_err(|e| DhtError::Serialization(e.to_string()))
    }

    /// Write atomically: temp file in the same directory, then rename
    pub async fn write(&self, path: &Path) -> DhtResult<()> {
        let bytes = self.to_bytes()?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            "Saved snapshot: {} contacts, {} entries",
            self.contacts.len(),
            self.entries.len()
        );
        Ok(())
    }

    /// Read and parse a snapshot file
    pub async fn read(path: &Path) -> DhtResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::current_timestamp;

    fn sample() -> Snapshot {
        let node_id = NodeId::from_bytes([1u8; 20]);
        let contacts = vec![
            Contact::with_last_seen(
                NodeId::from_bytes([2u8; 20]),
                "10.0.0.2:8335".parse().unwrap(),
                1_700_000_000,
            ),
            Contact::with_last_seen(
                NodeId::from_bytes([3u8; 20]),
                "10.0.0.3:8335".parse().unwrap(),
                1_700_000_100,
            ),
        ];
        let now = current_timestamp();
        let entries = vec![(
            NodeId::from_bytes([9u8; 20]),
            Entry {
                value: b"payload".to_vec(),
                stored_at: now,
                expires_at: now + 3600,
            },
        )];
        Snapshot::capture(node_id, contacts, entries.iter().map(|(k, e)| (k, e)))
    }

    #[test]
    fn test_exact_round_trip() {
        let snapshot = sample();
        let bytes = snapshot.to_bytes().unwrap();
        let restored = Snapshot::from_bytes(&bytes).unwrap();

        assert_eq!(snapshot, restored);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0] = b'X';

        match Snapshot::from_bytes(&bytes) {
            Err(DhtError::InvalidSnapshot(_)) => {}
            other => panic!("expected InvalidSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[4] = 0xFF;

        assert!(Snapshot::from_bytes(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.snapshot");

        let snapshot = sample();
        snapshot.write(&path).await.unwrap();

        let restored = Snapshot::read(&path).await.unwrap();
        assert_eq!(snapshot, restored);

        // No stray temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }
}
