//! Kademlia Routing Table
//!
//! Contacts are grouped into buckets by the length of the common prefix
//! between their ID and ours. A full bucket never silently overwrites an
//! entry: `insert` hands the oldest contact back to the caller, which must
//! probe it and either evict it or drop the newcomer.

use std::collections::VecDeque;
use std::time::Instant;

use subrosa_crypto::NodeId;
use tracing::{debug, trace};

use crate::node::Contact;
use crate::{K, NUM_BUCKETS};

/// Outcome of inserting a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    /// Contact was added to a bucket with room
    Added,
    /// Contact was already known; its entry was refreshed
    Refreshed,
    /// Bucket is full; the caller must ping `oldest` before anything is
    /// evicted, then call `evict_and_insert` on ping failure
    Full { oldest: Contact },
}

/// A K-bucket in the routing table
#[derive(Debug)]
pub struct KBucket {
    /// Contacts in this bucket (oldest first)
    contacts: VecDeque<Contact>,
    /// Last refresh time
    last_refresh: Instant,
}

impl KBucket {
    /// Create a new empty bucket
    pub fn new() -> Self {
        Self {
            contacts: VecDeque::with_capacity(K),
            last_refresh: Instant::now(),
        }
    }

    /// Check if bucket is full
    pub fn is_full(&self) -> bool {
        self.contacts.len() >= K
    }

    /// Get number of contacts
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Insert or refresh a contact
    pub fn insert(&mut self, contact: Contact) -> Insert {
        self.last_refresh = Instant::now();

        if let Some(pos) = self
            .contacts
            .iter()
            .position(|c| c.node_id == contact.node_id)
        {
            // Known contact: move to back (most recently seen)
            if let Some(mut existing) = self.contacts.remove(pos) {
                existing.addr = contact.addr;
                existing.touch();
                self.contacts.push_back(existing);
            }
            return Insert::Refreshed;
        }

        if !self.is_full() {
            self.contacts.push_back(contact);
            return Insert::Added;
        }

        // Full: the oldest contact must survive a liveness probe before
        // the newcomer may take its place
        let oldest = self
            .contacts
            .front()
            .cloned()
            .expect("full bucket has a front");
        Insert::Full { oldest }
    }

    /// Refresh a contact's last-seen time, if present
    pub fn touch(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.contacts.iter().position(|c| c.node_id == *id) {
            if let Some(mut contact) = self.contacts.remove(pos) {
                contact.touch();
                self.contacts.push_back(contact);
                return true;
            }
        }
        false
    }

    /// Remove a contact by ID
    pub fn remove(&mut self, id: &NodeId) -> Option<Contact> {
        let pos = self.contacts.iter().position(|c| c.node_id == *id)?;
        self.contacts.remove(pos)
    }

    /// Get all contacts
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    /// Mark the bucket as freshly looked up
    pub fn mark_refreshed(&mut self) {
        self.last_refresh = Instant::now();
    }

    /// Check if bucket needs refresh
    pub fn needs_refresh(&self, max_age: std::time::Duration) -> bool {
        !self.is_empty() && self.last_refresh.elapsed() > max_age
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

/// Kademlia routing table
pub struct RoutingTable {
    /// Our node ID
    local_id: NodeId,
    /// K-buckets (one for each bit of distance)
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create a new routing table
    pub fn new(local_id: NodeId) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| KBucket::new()).collect();
        Self { local_id, buckets }
    }

    /// Our node ID
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Get bucket index for a node ID
    fn bucket_index(&self, id: &NodeId) -> usize {
        let leading_zeros = self.local_id.leading_zeros(id) as usize;
        // Bucket 0 = closest (most leading zeros in XOR)
        // Bucket 159 = furthest (0 leading zeros)
        (NUM_BUCKETS - 1).saturating_sub(leading_zeros)
    }

    /// Insert or refresh a contact
    pub fn insert(&mut self, contact: Contact) -> Insert {
        if contact.node_id == self.local_id {
            return Insert::Refreshed; // Never track ourselves
        }

        let index = self.bucket_index(&contact.node_id);
        let outcome = self.buckets[index].insert(contact.clone());

        if matches!(outcome, Insert::Added) {
            trace!("Added contact {:?} to bucket {}", contact.node_id, index);
        }

        outcome
    }

    /// Evict a probed-dead contact and admit its replacement
    pub fn evict_and_insert(&mut self, dead: &NodeId, contact: Contact) {
        let index = self.bucket_index(dead);
        if self.buckets[index].remove(dead).is_some() {
            debug!("Evicted unresponsive contact {:?}", dead);
        }
        self.insert(contact);
    }

    /// Refresh a contact's last-seen time
    pub fn touch(&mut self, id: &NodeId) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].touch(id)
    }

    /// Remove a contact
    pub fn remove(&mut self, id: &NodeId) -> Option<Contact> {
        let index = self.bucket_index(id);
        self.buckets[index].remove(id)
    }

    /// Find the `count` closest contacts to a target, ordered by ascending
    /// XOR distance (ties broken by ID byte order)
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all: Vec<_> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts())
            .cloned()
            .collect();

        all.sort_by(|a, b| {
            let dist_a = target.distance(&a.node_id);
            let dist_b = target.distance(&b.node_id);
            dist_a.cmp(&dist_b).then(a.node_id.cmp(&b.node_id))
        });

        all.truncate(count);
        all
    }

    /// Get all contacts
    pub fn all_contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|b| b.contacts())
            .cloned()
            .collect()
    }

    /// Get total contact count
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    /// Find buckets that have had no traffic for `max_age`
    pub fn buckets_needing_refresh(&self, max_age: std::time::Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.needs_refresh(max_age))
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark a bucket as freshly looked up
    pub fn mark_refreshed(&mut self, index: usize) {
        if let Some(bucket) = self.buckets.get_mut(index) {
            bucket.mark_refreshed();
        }
    }

    /// Get a random node ID that would land in the given bucket
    pub fn random_id_in_bucket(&self, bucket_index: usize) -> NodeId {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut id_bytes = [0u8; 20];
        rng.fill(&mut id_bytes);

        let bit_position = NUM_BUCKETS - 1 - bucket_index;

        let local_bytes = self.local_id.as_bytes();
        let byte_pos = bit_position / 8;
        let bit_pos = bit_position % 8;

        for (i, b) in id_bytes.iter_mut().enumerate().take(byte_pos) {
            *b = local_bytes[i];
        }

        // Flip the target bit so the ID differs from ours at exactly that depth
        id_bytes[byte_pos] = local_bytes[byte_pos] ^ (0x80 >> bit_pos);

        NodeId::from_bytes(id_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 20])
    }

    fn make_contact(id: NodeId) -> Contact {
        Contact::new(id, "127.0.0.1:8335".parse().unwrap())
    }

    #[test]
    fn test_bucket_capacity() {
        let mut bucket = KBucket::new();

        for i in 0..K {
            let outcome = bucket.insert(make_contact(make_id(i as u8 + 1)));
            assert_eq!(outcome, Insert::Added);
        }

        assert!(bucket.is_full());
        assert_eq!(bucket.len(), K);

        // A full bucket reports the oldest contact instead of admitting more
        let outcome = bucket.insert(make_contact(make_id(100)));
        match outcome {
            Insert::Full { oldest } => assert_eq!(oldest.node_id, make_id(1)),
            other => panic!("expected Full, got {:?}", other),
        }
        assert_eq!(bucket.len(), K);
    }

    #[test]
    fn test_reinsert_refreshes() {
        let mut bucket = KBucket::new();

        bucket.insert(make_contact(make_id(1)));
        bucket.insert(make_contact(make_id(2)));

        // Re-inserting an existing contact moves it to the back
        assert_eq!(bucket.insert(make_contact(make_id(1))), Insert::Refreshed);
        let order: Vec<_> = bucket.contacts().map(|c| c.node_id).collect();
        assert_eq!(order, vec![make_id(2), make_id(1)]);
    }

    #[test]
    fn test_evict_and_insert() {
        let local = make_id(0);
        let mut table = RoutingTable::new(local);

        // IDs sharing a prefix land in the same bucket
        let mut ids = Vec::new();
        for i in 0..=K as u8 {
            let mut bytes = [0xFFu8; 20];
            bytes[19] = i;
            ids.push(NodeId::from_bytes(bytes));
        }

        for id in ids.iter().take(K) {
            assert_eq!(table.insert(make_contact(*id)), Insert::Added);
        }

        let newcomer = make_contact(ids[K]);
        let oldest = match table.insert(newcomer.clone()) {
            Insert::Full { oldest } => oldest,
            other => panic!("expected Full, got {:?}", other),
        };
        assert_eq!(oldest.node_id, ids[0]);

        // Probe failed: the incumbent goes, the newcomer stays
        table.evict_and_insert(&oldest.node_id, newcomer);
        assert!(table.find_closest(&ids[0], K + 1).iter().all(|c| c.node_id != ids[0]));
        assert!(table
            .find_closest(&ids[K], K + 1)
            .iter()
            .any(|c| c.node_id == ids[K]));
    }

    #[test]
    fn test_never_track_self() {
        let local = make_id(7);
        let mut table = RoutingTable::new(local);

        table.insert(make_contact(local));
        assert!(table.is_empty());
    }

    #[test]
    fn test_find_closest_sorted() {
        let local = make_id(0);
        let mut table = RoutingTable::new(local);

        for i in 1..30u8 {
            table.insert(make_contact(make_id(i)));
        }

        let target = make_id(5);
        let closest = table.find_closest(&target, 10);
        assert_eq!(closest.len(), 10);

        // Strictly non-decreasing XOR distance from the target
        for pair in closest.windows(2) {
            let d0 = target.distance(&pair[0].node_id);
            let d1 = target.distance(&pair[1].node_id);
            assert!(d0 <= d1);
        }

        // The target itself is the closest possible match
        assert_eq!(closest[0].node_id, target);
    }

    #[test]
    fn test_bucket_refresh_tracking() {
        let local = make_id(0);
        let mut table = RoutingTable::new(local);
        table.insert(make_contact(make_id(1)));

        // Nothing is stale yet
        assert!(table
            .buckets_needing_refresh(std::time::Duration::from_secs(3600))
            .is_empty());

        // Everything with contacts is stale at age zero
        let stale = table.buckets_needing_refresh(std::time::Duration::from_secs(0));
        assert_eq!(stale.len(), 1);

        let refresh_target = table.random_id_in_bucket(stale[0]);
        assert_ne!(refresh_target, local);
    }
}
