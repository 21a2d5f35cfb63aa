//! Encode / Decode
//!
//! `encode` is a pure transform from plaintext to a key→block map; the
//! caller is responsible for storing the entries (shuffled, so observers
//! cannot time the sequence). `decode` regenerates the recipient's candidate
//! key sequence and probes it through the overlay until a run of consecutive
//! misses marks the end of the stream.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use subrosa_crypto::{
    constants::NONCE_SIZE, decrypt, encrypt, NodeId, Nonce, PublicKey, SecretKey,
};
use subrosa_dht::{OverlayNode, RangeEstimate};
use tracing::debug;

use crate::block::Block;
use crate::error::{CodecError, CodecResult};
use crate::{FRAGMENT_SIZE, MAX_REPLICAS, MISS_WINDOW};

/// HKDF info tag for message keys
const MESSAGE_KEY_INFO: &[u8] = b"subrosa:msg";

/// Read access to stored blocks; implemented by the overlay node and by
/// plain maps in tests
#[async_trait]
pub trait BlockFetch {
    /// Fetch the value stored under `key`, if any
    async fn fetch_block(&self, key: NodeId) -> Option<Vec<u8>>;
}

#[async_trait]
impl BlockFetch for OverlayNode {
    async fn fetch_block(&self, key: NodeId) -> Option<Vec<u8>> {
        self.get(key).await.ok().flatten()
    }
}

/// Duplicate placements per block for the given overlay coverage.
///
/// A sparse overlay gets every block stored several times under distinct
/// keys; a well-populated one relies on the DHT's own replication.
pub fn replicas_for(range: &RangeEstimate) -> u8 {
    if range.peers < 5 || range.coverage < 0.25 {
        MAX_REPLICAS
    } else if range.coverage < 0.5 {
        2
    } else {
        1
    }
}

/// Encrypt `plaintext` for `recipient` and address it into the DHT key
/// space, starting at slot 0
pub fn encode(
    recipient: &PublicKey,
    sender: &SecretKey,
    plaintext: &[u8],
    range: &RangeEstimate,
) -> CodecResult<BTreeMap<NodeId, Vec<u8>>> {
    encode_from(recipient, sender, plaintext, range, 0)
}

/// Encrypt `plaintext` for `recipient`, placing blocks from `first_slot`
/// onward (used to append behind mail already stored for this recipient)
pub fn encode_from(
    recipient: &PublicKey,
    sender: &SecretKey,
    plaintext: &[u8],
    range: &RangeEstimate,
    first_slot: u32,
) -> CodecResult<BTreeMap<NodeId, Vec<u8>>> {
    let shared = sender.diffie_hellman(recipient);
    let key = shared.message_key(MESSAGE_KEY_INFO);
    let nonce = Nonce::generate();

    // One AEAD pass over the whole message; even empty plaintext yields a
    // tag-only ciphertext, so there is always at least one block
    let ciphertext = encrypt(&key, &nonce, plaintext)?;

    let fragments: Vec<&[u8]> = ciphertext.chunks(FRAGMENT_SIZE).collect();
    let total = fragments.len() as u32;

    if first_slot.checked_add(total).is_none() {
        return Err(CodecError::MessageTooLarge {
            blocks: fragments.len(),
            first_slot,
        });
    }

    let replicas = replicas_for(range);
    let sender_public = sender.public_key();

    let mut map = BTreeMap::new();
    for (i, fragment) in fragments.into_iter().enumerate() {
        let block = Block {
            sender: sender_public,
            nonce: nonce.to_bytes(),
            seq: i as u32,
            total,
            fragment: fragment.to_vec(),
        };
        let bytes = block.to_bytes()?;

        let slot = first_slot + i as u32;
        for replica in 0..replicas {
            map.insert(NodeId::for_block(recipient, slot, replica), bytes.clone());
        }
    }

    Ok(map)
}

/// Recover every readable message addressed to the holder of `own`.
///
/// Probes the candidate key sequence until [`MISS_WINDOW`] consecutive
/// slots are empty, reassembles fragment runs, and decrypts each. Runs that
/// fail to decrypt or never complete are skipped, not fatal. The scan is
/// restartable: every underlying read is idempotent.
pub async fn decode(own: &SecretKey, fetch: &impl BlockFetch) -> Vec<Vec<u8>> {
    let own_public = own.public_key();

    // Collect blocks in slot order until the stream runs dry
    let mut blocks = Vec::new();
    let mut slot = 0u32;
    let mut misses = 0u32;
    while misses < MISS_WINDOW {
        match probe_slot(&own_public, slot, fetch).await {
            Some(block) => {
                misses = 0;
                blocks.push(block);
            }
            None => misses += 1,
        }
        slot += 1;
    }

    // Group fragments into messages by (sender, nonce, total)
    type GroupKey = (PublicKey, [u8; NONCE_SIZE], u32);
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, BTreeMap<u32, Vec<u8>>> = HashMap::new();

    for block in blocks {
        if block.total == 0 || block.seq >= block.total {
            debug!("Skipping malformed block (seq {} of {})", block.seq, block.total);
            continue;
        }
        let group_key = (block.sender, block.nonce, block.total);
        if !groups.contains_key(&group_key) {
            order.push(group_key);
        }
        groups
            .entry(group_key)
            .or_default()
            .insert(block.seq, block.fragment);
    }

    let mut messages = Vec::new();
    for group_key in order {
        let (sender, nonce_bytes, total) = group_key;
        let fragments = &groups[&group_key];

        if fragments.len() != total as usize {
            debug!(
                "Incomplete message from {:?}: {} of {} fragments",
                sender,
                fragments.len(),
                total
            );
            continue;
        }

        let mut ciphertext = Vec::new();
        for fragment in fragments.values() {
            ciphertext.extend_from_slice(fragment);
        }

        let shared = own.diffie_hellman(&sender);
        let key = shared.message_key(MESSAGE_KEY_INFO);
        let nonce = Nonce::from_bytes(nonce_bytes);

        match decrypt(&key, &nonce, &ciphertext) {
            Ok(plaintext) => messages.push(plaintext),
            Err(_) => debug!("Skipping undecryptable message from {:?}", sender),
        }
    }

    messages
}

/// First slot with no mail behind it, for appending a new message
pub async fn first_free_slot(recipient: &PublicKey, fetch: &impl BlockFetch) -> u32 {
    let mut slot = 0u32;
    let mut misses = 0u32;
    let mut free_from = 0u32;

    while misses < MISS_WINDOW {
        if probe_slot(recipient, slot, fetch).await.is_some() {
            misses = 0;
            free_from = slot + 1;
        } else {
            misses += 1;
        }
        slot += 1;
    }

    free_from
}

/// Try every replica key for a slot, returning the first parseable block
async fn probe_slot(recipient: &PublicKey, slot: u32, fetch: &impl BlockFetch) -> Option<Block> {
    for replica in 0..MAX_REPLICAS {
        let key = NodeId::for_block(recipient, slot, replica);
        if let Some(bytes) = fetch.fetch_block(key).await {
            match Block::from_bytes(&bytes) {
                Ok(block) => return Some(block),
                Err(_) => debug!("Unparseable block at slot {} replica {}", slot, replica),
            }
        }
    }
    None
}
