// P2P layer (spec.md S4.8): the peer set, handshake acceptance rule, gossip
// dedup cache and reconnect backoff. The framed transport itself is a thin
// tokio TCP loop (one read task + one write task per connection, communicating
// with the rest of the node through the bounded channels described in
// spec.md S5) built on top of the pieces in this module; what is testable
// without a live socket lives here.

use lru::LruCache;
use metrics::counter;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use synod_common::{
    block::NodeId,
    crypto::PubKey,
    message::{HandshakePayload, SignedMessage},
    peer::Role,
    serializer::Serializer,
    time::TimestampMillis,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::P2pError;

/// Max accepted frame size, generous enough for a full block at
/// `max_txs_per_block` but not unbounded (spec.md S4.8 "malformed or
/// oversized frame -> disconnect").
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Writes `message` as a u32-BE length-prefixed canonical frame, the same
/// framing `Storage`'s block log uses on disk.
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(stream: &mut W, message: &SignedMessage) -> Result<(), P2pError> {
    let bytes = message.to_bytes();
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await.map_err(|_| P2pError::ConnectionLost)?;
    stream.write_all(&bytes).await.map_err(|_| P2pError::ConnectionLost)?;
    Ok(())
}

/// Reads one u32-BE length-prefixed frame and decodes it as a `SignedMessage`.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(stream: &mut R) -> Result<SignedMessage, P2pError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await.map_err(|_| P2pError::ConnectionLost)?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(P2pError::BadFrame);
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await.map_err(|_| P2pError::ConnectionLost)?;
    SignedMessage::from_bytes(&body).map_err(|_| P2pError::BadFrame)
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ConnectionState {
    Handshaking,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub node_id: NodeId,
    pub transport_address: String,
    pub public_key: PubKey,
    pub last_seen: TimestampMillis,
    pub network_id: String,
    pub role: Role,
    /// Running counter, bumped by the consensus/ledger layers on good
    /// behaviour; read-only from here (spec.md S3 "Peer entry").
    pub reputation: i64,
    pub state: ConnectionState,
    pub is_pioneer: bool,
}

const GOSSIP_DEDUP_CAPACITY: usize = 8192;
const AVOID_LIST_CAPACITY: usize = 1024;

/// Owns every peer entry exclusively (spec.md S3 "Ownership"); mutated only
/// by the P2P task.
pub struct PeerSet {
    local_network_id: String,
    max_peers: usize,
    low_water_mark: usize,
    peers: HashMap<NodeId, PeerEntry>,
    /// `(sender, message_id)` seen before - caps unbounded gossip storms
    /// rather than a literal TTL (spec.md S4.8 "dedup cache with TTL").
    gossip_seen: LruCache<(NodeId, u64), ()>,
    /// Peers disconnected for signature failure, kept out for a short window
    /// (spec.md S4.8 "short-TTL avoid-list").
    avoid_list: LruCache<NodeId, ()>,
}

impl PeerSet {
    pub fn new(local_network_id: String, max_peers: usize, low_water_mark: usize) -> Self {
        PeerSet {
            local_network_id,
            max_peers,
            low_water_mark,
            peers: HashMap::new(),
            gossip_seen: LruCache::new(NonZeroUsize::new(GOSSIP_DEDUP_CAPACITY).unwrap()),
            avoid_list: LruCache::new(NonZeroUsize::new(AVOID_LIST_CAPACITY).unwrap()),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_on_avoid_list(&mut self, node_id: &NodeId) -> bool {
        self.avoid_list.get(node_id).is_some()
    }

    pub fn needs_more_peers(&self) -> bool {
        self.peers.len() < self.low_water_mark
    }

    /// Accepts or rejects a handshake (spec.md S4.8). On rejection the
    /// `IncompatibleNetworkRejection` counter is bumped and no peer entry is
    /// created on this side (P8).
    pub fn handshake(
        &mut self,
        handshake: HandshakePayload,
        transport_address: String,
        now: TimestampMillis,
    ) -> Result<(), P2pError> {
        if handshake.network_id != self.local_network_id {
            counter!("synod_p2p_incompatible_network_rejections_total").increment(1);
            return Err(P2pError::IncompatibleNetwork {
                ours: self.local_network_id.clone(),
                theirs: handshake.network_id,
            });
        }

        if self.peers.len() >= self.max_peers && !self.peers.contains_key(&handshake.node_id) {
            if let Some(evicted) = self.least_recently_seen() {
                self.peers.remove(&evicted);
            }
        }

        self.peers.insert(
            handshake.node_id,
            PeerEntry {
                node_id: handshake.node_id,
                transport_address,
                public_key: handshake.public_key,
                last_seen: now,
                network_id: handshake.network_id,
                role: handshake.role,
                reputation: 0,
                state: ConnectionState::Connected,
                is_pioneer: handshake.is_pioneer,
            },
        );
        Ok(())
    }

    pub fn touch(&mut self, node_id: &NodeId, now: TimestampMillis) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.last_seen = now;
        }
    }

    /// Transport closed; mark Disconnected rather than removing outright, so
    /// a reconnect within the backoff window resumes the same entry
    /// (spec.md S3 "Peer entry" lifecycle).
    pub fn mark_disconnected(&mut self, node_id: &NodeId) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.state = ConnectionState::Disconnected;
        }
    }

    /// A signature failure disconnects the peer and adds it to the
    /// short-TTL avoid-list (spec.md S4.8).
    pub fn disconnect_for_signature_failure(&mut self, node_id: &NodeId) {
        self.peers.remove(node_id);
        self.avoid_list.put(*node_id, ());
    }

    pub fn ainode_ids_sorted(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .peers
            .values()
            .filter(|p| p.role == Role::AINode && p.state == ConnectionState::Connected)
            .map(|p| p.node_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn connected_pioneers(&self) -> Vec<NodeId> {
        self.peers
            .values()
            .filter(|p| p.is_pioneer && p.state == ConnectionState::Connected)
            .map(|p| p.node_id)
            .collect()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&PeerEntry> {
        self.peers.get(node_id)
    }

    fn least_recently_seen(&self) -> Option<NodeId> {
        self.peers.values().min_by_key(|p| p.last_seen).map(|p| p.node_id)
    }

    /// Returns `true` (forward) the first time `(sender, message_id)` is
    /// seen, `false` on every repeat - the gossip-forward-once rule and the
    /// idempotent-dispatch law share this cache (spec.md S4.8, S8).
    pub fn should_forward(&mut self, sender: NodeId, message_id: u64) -> bool {
        let key = (sender, message_id);
        if self.gossip_seen.get(&key).is_some() {
            false
        } else {
            self.gossip_seen.put(key, ());
            true
        }
    }
}

/// Exponential reconnect backoff with a hard cap (spec.md S4.8).
pub struct ReconnectBackoff {
    min_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        ReconnectBackoff { min_ms, max_ms, attempt: 0 }
    }

    pub fn next_delay_ms(&mut self) -> u64 {
        let delay = self.min_ms.saturating_mul(1u64 << self.attempt.min(32)).min(self.max_ms);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_common::crypto::{Address, KeyPair};

    fn handshake(node_id: NodeId, network_id: &str, role: Role) -> HandshakePayload {
        HandshakePayload {
            node_id,
            public_key: KeyPair::from_seed([7u8; 32]).public_key(),
            network_id: network_id.to_string(),
            role,
            is_pioneer: false,
        }
    }

    #[test]
    fn wrong_network_id_is_rejected_and_creates_no_peer_entry() {
        let mut set = PeerSet::new("synod-mainnet".into(), 10, 2);
        let node_id = Address::from_bytes([1u8; 32]);
        let result = set.handshake(handshake(node_id, "synod-testnet", Role::AINode), "127.0.0.1:1".into(), 1000);
        assert!(matches!(result, Err(P2pError::IncompatibleNetwork { .. })));
        assert!(set.get(&node_id).is_none());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn matching_network_id_is_accepted() {
        let mut set = PeerSet::new("synod-mainnet".into(), 10, 2);
        let node_id = Address::from_bytes([2u8; 32]);
        set.handshake(handshake(node_id, "synod-mainnet", Role::AINode), "127.0.0.1:2".into(), 1000)
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&node_id).unwrap().state, ConnectionState::Connected);
    }

    #[test]
    fn over_capacity_evicts_least_recently_seen() {
        let mut set = PeerSet::new("synod-mainnet".into(), 1, 1);
        let old = Address::from_bytes([3u8; 32]);
        set.handshake(handshake(old, "synod-mainnet", Role::AINode), "a".into(), 1000).unwrap();
        let new = Address::from_bytes([4u8; 32]);
        set.handshake(handshake(new, "synod-mainnet", Role::AINode), "b".into(), 2000).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get(&old).is_none());
        assert!(set.get(&new).is_some());
    }

    #[test]
    fn gossip_is_forwarded_exactly_once() {
        let mut set = PeerSet::new("synod-mainnet".into(), 10, 2);
        let sender = Address::from_bytes([5u8; 32]);
        assert!(set.should_forward(sender, 1));
        assert!(!set.should_forward(sender, 1));
        assert!(set.should_forward(sender, 2));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = ReconnectBackoff::new(1_000, 10_000);
        assert_eq!(backoff.next_delay_ms(), 1_000);
        assert_eq!(backoff.next_delay_ms(), 2_000);
        assert_eq!(backoff.next_delay_ms(), 4_000);
        assert_eq!(backoff.next_delay_ms(), 8_000);
        assert_eq!(backoff.next_delay_ms(), 10_000);
        assert_eq!(backoff.next_delay_ms(), 10_000);
    }

    #[test]
    fn signature_failure_disconnects_and_adds_to_avoid_list() {
        let mut set = PeerSet::new("synod-mainnet".into(), 10, 2);
        let node_id = Address::from_bytes([6u8; 32]);
        set.handshake(handshake(node_id, "synod-mainnet", Role::AINode), "c".into(), 1000).unwrap();
        set.disconnect_for_signature_failure(&node_id);
        assert!(set.get(&node_id).is_none());
        assert!(set.is_on_avoid_list(&node_id));
    }

    #[tokio::test]
    async fn frame_round_trips_over_a_duplex_stream() {
        use synod_common::message::MessagePayload;

        let (mut a, mut b) = tokio::io::duplex(8192);
        let keys = KeyPair::from_seed([9u8; 32]);
        let message = SignedMessage::new(42, keys.address(), MessagePayload::Heartbeat { tip_height: 7 }, &keys);

        write_frame(&mut a, &message).await.unwrap();
        let received = read_frame(&mut b).await.unwrap();
        assert_eq!(received.message_id, 42);
        assert_eq!(received.sender, keys.address());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_as_bad_frame() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        a.write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes()).await.unwrap();
        let result = read_frame(&mut b).await;
        assert!(matches!(result, Err(P2pError::BadFrame)));
    }
}
