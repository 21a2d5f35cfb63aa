//! Local Value Storage
//!
//! Every node keeps the key/value entries it is responsible for in memory,
//! with wall-clock expiry so entries vanish unless their publisher
//! republishes them. Timestamps are Unix seconds so the store survives a
//! snapshot round-trip unchanged.

use std::collections::HashMap;

use subrosa_crypto::NodeId;
use tracing::debug;

use crate::node::current_timestamp;
use crate::MAX_VALUE_SIZE;

/// A stored value with lifecycle metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The value data
    pub value: Vec<u8>,
    /// Unix timestamp when this value was stored
    pub stored_at: u64,
    /// Unix timestamp when this value expires
    pub expires_at: u64,
}

impl Entry {
    fn new(value: Vec<u8>, ttl_secs: u32) -> Self {
        let now = current_timestamp();
        Self {
            value,
            stored_at: now,
            expires_at: now + ttl_secs as u64,
        }
    }

    /// Check if expired
    pub fn is_expired(&self) -> bool {
        current_timestamp() >= self.expires_at
    }

    /// Remaining TTL in seconds
    pub fn remaining_ttl(&self) -> u32 {
        self.expires_at.saturating_sub(current_timestamp()) as u32
    }
}

/// In-memory key/value store with TTL
pub struct Store {
    /// Stored values by key
    entries: HashMap<NodeId, Entry>,
    /// Maximum entries
    max_entries: usize,
}

impl Store {
    /// Create new storage with default limits
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Create with a custom entry cap
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Store a value; returns false when refused (too large or store full)
    pub fn insert(&mut self, key: NodeId, value: Vec<u8>, ttl_secs: u32) -> bool {
        if value.len() > MAX_VALUE_SIZE {
            return false;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                return false;
            }
        }

        self.entries.insert(key, Entry::new(value, ttl_secs));
        true
    }

    /// Restore an entry with explicit timestamps (snapshot load)
    pub fn restore(&mut self, key: NodeId, entry: Entry) {
        if !entry.is_expired() {
            self.entries.insert(key, entry);
        }
    }

    /// Get a live value
    pub fn get(&self, key: &NodeId) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Check if a live value exists
    pub fn contains(&self, key: &NodeId) -> bool {
        self.get(key).is_some()
    }

    /// Remove a value
    pub fn remove(&mut self, key: &NodeId) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Get number of entries (including not-yet-purged expired ones)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Purged {} expired entries", removed);
        }
        removed
    }

    /// Live entries stored at least `max_age_secs` ago, with remaining TTL
    pub fn due_for_republish(&self, max_age_secs: u64) -> Vec<(NodeId, Vec<u8>, u32)> {
        let now = current_timestamp();
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_expired() && now.saturating_sub(e.stored_at) >= max_age_secs)
            .map(|(k, e)| (*k, e.value.clone(), e.remaining_ttl()))
            .collect()
    }

    /// All entries, for snapshotting
    pub fn entries(&self) -> impl Iterator<Item = (&NodeId, &Entry)> {
        self.entries.iter()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 20])
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = Store::new();

        assert!(store.insert(key(1), b"test data".to_vec(), 60));
        assert!(store.contains(&key(1)));
        assert_eq!(store.get(&key(1)).unwrap(), b"test data");
    }

    #[test]
    fn test_expiry() {
        let mut store = Store::new();

        // Zero TTL expires immediately
        store.insert(key(2), b"expiring".to_vec(), 0);
        assert!(store.get(&key(2)).is_none());
    }

    #[test]
    fn test_value_size_ceiling() {
        let mut store = Store::new();

        let oversized = vec![0u8; MAX_VALUE_SIZE + 1];
        assert!(!store.insert(key(3), oversized, 60));

        let max = vec![0u8; MAX_VALUE_SIZE];
        assert!(store.insert(key(3), max, 60));
    }

    #[test]
    fn test_purge_expired() {
        let mut store = Store::new();

        for i in 0..6u8 {
            let ttl = if i % 2 == 0 { 0 } else { 3600 };
            store.insert(key(i), vec![i], ttl);
        }

        let removed = store.purge_expired();
        assert_eq!(removed, 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_entry_cap() {
        let mut store = Store::with_capacity(3);

        for i in 0..3u8 {
            assert!(store.insert(key(i), vec![i], 3600));
        }
        assert!(!store.insert(key(99), vec![99], 3600));

        // Overwriting an existing key is always allowed
        assert!(store.insert(key(1), vec![42], 3600));
    }

    #[test]
    fn test_republish_selection() {
        let mut store = Store::new();

        store.insert(key(1), b"fresh".to_vec(), 3600);

        // Freshly stored entries are not due yet
        assert!(store.due_for_republish(60).is_empty());

        // Everything live is due at age zero
        let due = store.due_for_republish(0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, key(1));
        assert!(due[0].2 > 0);
    }
}
