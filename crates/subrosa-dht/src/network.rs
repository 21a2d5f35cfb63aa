//! Overlay Node
//!
//! UDP transport plus the high-level DHT operations: bootstrap, iterative
//! lookup, get/set, the key-space range estimate, and periodic maintenance.
//! One receive loop answers peer requests and completes pending RPCs; all
//! shared state lives behind a single RwLock that is never held across an
//! await on the network.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use subrosa_crypto::NodeId;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::error::{DhtError, DhtResult};
use crate::node::{Contact, PeerInfo};
use crate::persist::Snapshot;
use crate::protocol::{Envelope, Message, Reply, Request, RpcId};
use crate::routing::{Insert, RoutingTable};
use crate::storage::Store;
use crate::{
    ALPHA, BUCKET_REFRESH_INTERVAL_SECS, K, MAX_VALUE_SIZE, REPUBLISH_INTERVAL_SECS,
    VALUE_EXPIRY_SECS,
};

/// Default timeout for RPC calls
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// TTL for values cached locally after a successful remote lookup
const CACHE_TTL_SECS: u32 = 3600;

/// Estimate of how much of the key space reachable peers cover.
///
/// `coverage` is the span of the K nearest neighbour IDs over the whole
/// space: near zero on a sparse or freshly bootstrapped overlay, approaching
/// the populated fraction as the table fills. Callers use it to size
/// per-value redundancy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeEstimate {
    /// Number of contacts currently in the routing table
    pub peers: usize,
    /// Estimated populated fraction of the key space, 0.0..=1.0
    pub coverage: f64,
}

impl RangeEstimate {
    /// True when the routing table knows no peers at all
    pub fn is_isolated(&self) -> bool {
        self.peers == 0
    }
}

/// Routing table and local store behind one lock
struct NodeState {
    routing: RoutingTable,
    store: Store,
}

type Pending = RwLock<HashMap<RpcId, oneshot::Sender<Reply>>>;

/// Result of an iterative lookup
enum Found {
    Value(Vec<u8>),
    Nodes(Vec<PeerInfo>),
}

/// A running overlay node
pub struct OverlayNode {
    /// UDP socket shared with the receive loop
    socket: Arc<UdpSocket>,
    /// Routing table + local store
    state: Arc<RwLock<NodeState>>,
    /// In-flight RPCs awaiting replies
    pending: Arc<Pending>,
    /// Our node ID
    node_id: NodeId,
    /// Is the receive loop running
    running: Arc<AtomicBool>,
    /// Shutdown signal for the receive loop
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl OverlayNode {
    /// Bind a node to a local UDP address
    pub async fn bind(node_id: NodeId, bind_addr: &str) -> DhtResult<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("Overlay node {:?} listening on {}", node_id, socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            state: Arc::new(RwLock::new(NodeState {
                routing: RoutingTable::new(node_id),
                store: Store::new(),
            })),
            pending: Arc::new(RwLock::new(HashMap::new())),
            node_id,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> DhtResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Get our node ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Start the receive loop
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let socket = self.socket.clone();
        let state = self.state.clone();
        let pending = self.pending.clone();
        let running = self.running.clone();
        let local_id = self.node_id;

        tokio::spawn(async move {
            let mut buf = [0u8; 65536];

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Overlay node shutting down");
                        break;
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, addr)) => {
                                if let Err(e) = handle_packet(
                                    &buf[..len],
                                    addr,
                                    &socket,
                                    &state,
                                    &pending,
                                    local_id,
                                ).await {
                                    trace!("Error handling packet from {}: {}", addr, e);
                                }
                            }
                            Err(e) => {
                                if running.load(Ordering::Relaxed) {
                                    error!("Socket error: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop the receive loop
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// Ping a peer, returning its node ID
    pub async fn ping(&self, target: SocketAddr) -> DhtResult<NodeId> {
        let request = Request::Ping {
            sender: self.node_id,
        };
        match send_rpc(self.socket.clone(), self.pending.clone(), target, request).await? {
            Reply::Pong { sender } => Ok(sender),
            _ => Err(DhtError::Timeout),
        }
    }

    /// Join the overlay through seed peers.
    ///
    /// Returns the number of seeds that answered. Zero is not fatal: the
    /// node stays isolated but fully operational for local reads and writes.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> DhtResult<usize> {
        if seeds.is_empty() {
            info!("No seed peers configured, starting as first node");
            return Ok(0);
        }

        let mut reached = 0;
        for addr in seeds {
            match self.ping(*addr).await {
                Ok(peer_id) => {
                    reached += 1;
                    self.insert_contact(PeerInfo {
                        node_id: peer_id,
                        addr: *addr,
                    })
                    .await;
                }
                Err(_) => warn!("Seed peer {} did not respond", addr),
            }
        }

        if reached == 0 {
            warn!("No seed peer responded; continuing isolated");
            return Ok(0);
        }

        // Walk toward our own ID to populate the nearby buckets
        let _ = self.lookup(self.node_id, false).await;

        let contacts = self.contact_count().await;
        info!("Bootstrap complete, {} contacts in routing table", contacts);
        Ok(reached)
    }

    /// Get a value from the overlay
    pub async fn get(&self, key: NodeId) -> DhtResult<Option<Vec<u8>>> {
        if let Some(value) = self.state.read().await.store.get(&key) {
            return Ok(Some(value));
        }

        if self.state.read().await.routing.is_empty() {
            return Ok(None);
        }

        match self.lookup(key, true).await {
            Found::Value(value) => {
                self.state
                    .write()
                    .await
                    .store
                    .insert(key, value.clone(), CACHE_TTL_SECS);
                Ok(Some(value))
            }
            Found::Nodes(_) => {
                debug!("Lookup for {:?} exhausted without a value", key);
                Ok(None)
            }
        }
    }

    /// Store a value in the overlay with the default TTL.
    ///
    /// Returns the number of remote peers that acknowledged the store. A
    /// local replica is always kept, so an isolated node remains able to
    /// serve its own reads.
    pub async fn set(&self, key: NodeId, value: Vec<u8>) -> DhtResult<usize> {
        self.set_with_ttl(key, value, VALUE_EXPIRY_SECS as u32).await
    }

    /// Store a value with an explicit TTL
    pub async fn set_with_ttl(&self, key: NodeId, value: Vec<u8>, ttl: u32) -> DhtResult<usize> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(DhtError::ValueTooLarge {
                size: value.len(),
                limit: MAX_VALUE_SIZE,
            });
        }

        self.state
            .write()
            .await
            .store
            .insert(key, value.clone(), ttl);

        let targets = match self.lookup(key, false).await {
            Found::Nodes(peers) => peers,
            Found::Value(_) => Vec::new(),
        };

        let mut handles = Vec::new();
        for peer in targets.into_iter().take(K) {
            let socket = self.socket.clone();
            let pending = self.pending.clone();
            let request = Request::Store {
                sender: self.node_id,
                key,
                value: value.clone(),
                ttl,
            };
            handles.push(tokio::spawn(async move {
                send_rpc(socket, pending, peer.addr, request).await
            }));
        }

        let mut acks = 0;
        for handle in handles {
            if let Ok(Ok(Reply::Ack { stored: true, .. })) = handle.await {
                acks += 1;
            }
        }

        debug!("Stored {:?} on {} peers", key, acks);
        Ok(acks)
    }

    /// Estimate how much of the key space reachable peers cover
    pub async fn range(&self) -> RangeEstimate {
        let state = self.state.read().await;
        let peers = state.routing.len();
        let neighbors = state.routing.find_closest(&self.node_id, K);

        if neighbors.len() < 2 {
            return RangeEstimate {
                peers,
                coverage: 0.0,
            };
        }

        let mut lo = u64::MAX;
        let mut hi = 0u64;
        for contact in &neighbors {
            let prefix = contact.node_id.prefix_u64();
            lo = lo.min(prefix);
            hi = hi.max(prefix);
        }

        RangeEstimate {
            peers,
            coverage: (hi - lo) as f64 / u64::MAX as f64,
        }
    }

    /// Number of contacts in the routing table
    pub async fn contact_count(&self) -> usize {
        self.state.read().await.routing.len()
    }

    /// Take a point-in-time snapshot of routing table and local store
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot::capture(
            self.node_id,
            state.routing.all_contacts(),
            state.store.entries(),
        )
    }

    /// Restore contacts and entries from a snapshot
    pub async fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.state.write().await;
        for contact in snapshot.contacts() {
            state.routing.insert(contact);
        }
        for (key, entry) in snapshot.into_entries() {
            state.store.restore(key, entry);
        }
    }

    /// One pass of background maintenance: purge expired entries, republish
    /// aged ones, refresh idle buckets
    pub async fn maintenance_tick(&self) {
        self.state.write().await.store.purge_expired();

        let due = self
            .state
            .read()
            .await
            .store
            .due_for_republish(REPUBLISH_INTERVAL_SECS);
        for (key, value, ttl) in due {
            if let Err(e) = self.set_with_ttl(key, value, ttl).await {
                debug!("Republish of {:?} failed: {}", key, e);
            }
        }

        let stale: Vec<(usize, NodeId)> = {
            let state = self.state.read().await;
            state
                .routing
                .buckets_needing_refresh(Duration::from_secs(BUCKET_REFRESH_INTERVAL_SECS))
                .into_iter()
                .map(|i| (i, state.routing.random_id_in_bucket(i)))
                .collect()
        };
        for (index, target) in stale {
            let _ = self.lookup(target, false).await;
            self.state.write().await.routing.mark_refreshed(index);
        }
    }

    /// Iterative Kademlia lookup toward `target`.
    ///
    /// Each round queries the α closest unqueried contacts in parallel and
    /// merges learned peers only after the whole round settles or times out.
    /// Terminates when every contact among the K closest has been queried,
    /// or as soon as a value turns up.
    async fn lookup(&self, target: NodeId, want_value: bool) -> Found {
        let mut shortlist: Vec<PeerInfo> = self
            .state
            .read()
            .await
            .routing
            .find_closest(&target, K)
            .iter()
            .map(Contact::peer_info)
            .collect();
        let mut queried: HashSet<NodeId> = HashSet::new();

        loop {
            let round: Vec<PeerInfo> = shortlist
                .iter()
                .filter(|p| !queried.contains(&p.node_id))
                .take(ALPHA)
                .copied()
                .collect();

            if round.is_empty() {
                break;
            }

            let mut handles = Vec::new();
            for peer in round {
                queried.insert(peer.node_id);

                let socket = self.socket.clone();
                let pending = self.pending.clone();
                let request = if want_value {
                    Request::FindValue {
                        sender: self.node_id,
                        key: target,
                    }
                } else {
                    Request::FindNode {
                        sender: self.node_id,
                        target,
                    }
                };

                handles.push((
                    peer,
                    tokio::spawn(
                        async move { send_rpc(socket, pending, peer.addr, request).await },
                    ),
                ));
            }

            // Round barrier: the frontier is only updated once every
            // outstanding query has settled or timed out
            let mut learned: Vec<PeerInfo> = Vec::new();
            let mut value = None;
            for (peer, handle) in handles {
                match handle.await {
                    Ok(Ok(Reply::Nodes { peers, .. })) => learned.extend(peers),
                    Ok(Ok(Reply::Value { value: v, .. })) if want_value => value = Some(v),
                    Ok(Ok(_)) => {}
                    _ => self.spawn_liveness_probe(peer),
                }
            }

            if let Some(v) = value {
                return Found::Value(v);
            }

            for peer in learned {
                if peer.node_id == self.node_id {
                    continue;
                }
                if !shortlist.iter().any(|p| p.node_id == peer.node_id) {
                    shortlist.push(peer);
                }
            }

            shortlist.sort_by(|a, b| {
                let dist_a = target.distance(&a.node_id);
                let dist_b = target.distance(&b.node_id);
                dist_a.cmp(&dist_b).then(a.node_id.cmp(&b.node_id))
            });
            shortlist.truncate(K);
        }

        Found::Nodes(shortlist)
    }

    /// Insert a contact, honoring the full-bucket liveness check
    async fn insert_contact(&self, peer: PeerInfo) {
        observe_contact(&self.socket, &self.state, &self.pending, self.node_id, peer).await;
    }

    /// Probe a peer that failed to answer; evict it if the retry also fails
    fn spawn_liveness_probe(&self, peer: PeerInfo) {
        let socket = self.socket.clone();
        let state = self.state.clone();
        let pending = self.pending.clone();
        let local_id = self.node_id;

        tokio::spawn(async move {
            let probe = Request::Ping { sender: local_id };
            match send_rpc(socket, pending, peer.addr, probe).await {
                Ok(Reply::Pong { .. }) => {
                    state.write().await.routing.touch(&peer.node_id);
                }
                _ => {
                    if state.write().await.routing.remove(&peer.node_id).is_some() {
                        debug!("Evicted unresponsive contact {:?}", peer.node_id);
                    }
                }
            }
        });
    }
}

/// Handle one incoming datagram
async fn handle_packet(
    data: &[u8],
    from: SocketAddr,
    socket: &Arc<UdpSocket>,
    state: &Arc<RwLock<NodeState>>,
    pending: &Arc<Pending>,
    local_id: NodeId,
) -> DhtResult<()> {
    let envelope = Envelope::from_bytes(data)?;

    trace!("Received {:?} from {}", envelope.message, from);

    // Every packet doubles as liveness evidence for its sender
    let sender = envelope.message.sender();
    observe_contact(
        socket,
        state,
        pending,
        local_id,
        PeerInfo {
            node_id: sender,
            addr: from,
        },
    )
    .await;

    match &envelope.message {
        Message::Request(request) => {
            let reply = handle_request(request, state, local_id).await;
            let bytes = envelope.reply(reply).to_bytes()?;
            socket.send_to(&bytes, from).await?;
        }
        Message::Reply(reply) => {
            let mut guard = pending.write().await;
            match guard.remove(&envelope.rpc_id) {
                Some(tx) => {
                    let _ = tx.send(reply.clone());
                }
                None => trace!("No pending RPC for id {}", envelope.rpc_id),
            }
        }
    }

    Ok(())
}

/// Answer a peer request
async fn handle_request(
    request: &Request,
    state: &RwLock<NodeState>,
    local_id: NodeId,
) -> Reply {
    match request {
        Request::Ping { sender } => {
            trace!("Ping from {:?}", sender);
            Reply::Pong { sender: local_id }
        }

        Request::FindNode { sender, target } => {
            let peers: Vec<PeerInfo> = state
                .read()
                .await
                .routing
                .find_closest(target, K)
                .iter()
                .map(Contact::peer_info)
                .collect();

            debug!("FindNode from {:?}, returning {} peers", sender, peers.len());
            Reply::Nodes {
                sender: local_id,
                peers,
            }
        }

        Request::FindValue { key, .. } => {
            let guard = state.read().await;
            if let Some(value) = guard.store.get(key) {
                Reply::Value {
                    sender: local_id,
                    value,
                }
            } else {
                let peers: Vec<PeerInfo> = guard
                    .routing
                    .find_closest(key, K)
                    .iter()
                    .map(Contact::peer_info)
                    .collect();
                Reply::Nodes {
                    sender: local_id,
                    peers,
                }
            }
        }

        Request::Store {
            sender,
            key,
            value,
            ttl,
        } => {
            let stored = state
                .write()
                .await
                .store
                .insert(*key, value.clone(), *ttl);
            debug!(
                "Store of {} from {:?}: {}",
                hex::encode(&key.as_bytes()[..8]),
                sender,
                if stored { "kept" } else { "refused" }
            );
            Reply::Ack {
                sender: local_id,
                stored,
            }
        }
    }
}

/// Track a peer we heard from, probing the bucket incumbent when full
async fn observe_contact(
    socket: &Arc<UdpSocket>,
    state: &Arc<RwLock<NodeState>>,
    pending: &Arc<Pending>,
    local_id: NodeId,
    peer: PeerInfo,
) {
    if peer.node_id == local_id {
        return;
    }

    let outcome = state.write().await.routing.insert(Contact::from(peer));

    if let Insert::Full { oldest } = outcome {
        // The incumbent gets one chance to prove liveness; the newcomer
        // only takes its slot if the probe fails
        let socket = socket.clone();
        let state = state.clone();
        let pending = pending.clone();

        tokio::spawn(async move {
            let probe = Request::Ping { sender: local_id };
            match send_rpc(socket, pending, oldest.addr, probe).await {
                Ok(Reply::Pong { .. }) => {
                    state.write().await.routing.touch(&oldest.node_id);
                }
                _ => {
                    state
                        .write()
                        .await
                        .routing
                        .evict_and_insert(&oldest.node_id, Contact::from(peer));
                }
            }
        });
    }
}

/// Send a request and wait for its reply, bounded by the RPC timeout
async fn send_rpc(
    socket: Arc<UdpSocket>,
    pending: Arc<Pending>,
    target: SocketAddr,
    request: Request,
) -> DhtResult<Reply> {
    let envelope = Envelope::request(request);
    let rpc_id = envelope.rpc_id;
    let data = envelope.to_bytes()?;

    let (tx, rx) = oneshot::channel();
    pending.write().await.insert(rpc_id, tx);

    if let Err(e) = socket.send_to(&data, target).await {
        pending.write().await.remove(&rpc_id);
        return Err(e.into());
    }

    match tokio::time::timeout(RPC_TIMEOUT, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        _ => {
            pending.write().await.remove(&rpc_id);
            Err(DhtError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_node(seed: u8) -> OverlayNode {
        let id = NodeId::from_bytes([seed; 20]);
        let mut node = OverlayNode::bind(id, "127.0.0.1:0").await.unwrap();
        node.start();
        node
    }

    fn key(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 20])
    }

    #[tokio::test]
    async fn test_two_node_set_get() {
        let a = spawn_node(1).await;
        let b = spawn_node(2).await;

        let reached = a.bootstrap(&[b.local_addr().unwrap()]).await.unwrap();
        assert_eq!(reached, 1);
        assert_eq!(a.contact_count().await, 1);

        let acks = a.set(key(50), b"v".to_vec()).await.unwrap();
        assert_eq!(acks, 1);

        // B holds a replica and serves it independently
        let value = b.get(key(50)).await.unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_bootstrap_is_bidirectional() {
        let a = spawn_node(3).await;
        let b = spawn_node(4).await;

        a.bootstrap(&[b.local_addr().unwrap()]).await.unwrap();

        // B learned about A from A's traffic
        assert_eq!(b.contact_count().await, 1);
    }

    #[tokio::test]
    async fn test_multi_hop_lookup() {
        let hub = spawn_node(10).await;
        let a = spawn_node(11).await;
        let c = spawn_node(12).await;

        a.bootstrap(&[hub.local_addr().unwrap()]).await.unwrap();
        c.bootstrap(&[hub.local_addr().unwrap()]).await.unwrap();

        a.set(key(90), b"relayed".to_vec()).await.unwrap();

        let value = c.get(key(90)).await.unwrap();
        assert_eq!(value, Some(b"relayed".to_vec()));
    }

    #[tokio::test]
    async fn test_isolated_node_local_read_write() {
        let node = spawn_node(20).await;

        // No peers: get misses cleanly
        assert_eq!(node.get(key(1)).await.unwrap(), None);

        // Set keeps a local replica even with zero remote acks
        let acks = node.set(key(1), b"mine".to_vec()).await.unwrap();
        assert_eq!(acks, 0);
        assert_eq!(node.get(key(1)).await.unwrap(), Some(b"mine".to_vec()));
    }

    #[tokio::test]
    async fn test_value_size_ceiling() {
        let node = spawn_node(21).await;

        let oversized = vec![0u8; MAX_VALUE_SIZE + 1];
        match node.set(key(2), oversized).await {
            Err(DhtError::ValueTooLarge { .. }) => {}
            other => panic!("expected ValueTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_range_estimate_reflects_peers() {
        let node = spawn_node(30).await;

        let isolated = node.range().await;
        assert!(isolated.is_isolated());
        assert_eq!(isolated.coverage, 0.0);

        let b = spawn_node(31).await;
        node.bootstrap(&[b.local_addr().unwrap()]).await.unwrap();

        let sparse = node.range().await;
        assert_eq!(sparse.peers, 1);
        // A single neighbour still spans no measurable range
        assert_eq!(sparse.coverage, 0.0);
    }

    #[tokio::test]
    async fn test_repeated_get_is_idempotent() {
        let a = spawn_node(40).await;
        let b = spawn_node(41).await;
        a.bootstrap(&[b.local_addr().unwrap()]).await.unwrap();

        a.set(key(70), b"stable".to_vec()).await.unwrap();

        let first = b.get(key(70)).await.unwrap();
        let second = b.get(key(70)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Some(b"stable".to_vec()));
    }
}
