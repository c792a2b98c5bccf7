use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::debug;

use crate::net::protocol::{encode_server, ServerMessage};

/// Opaque transport-level connection identifier.
pub type ConnectionId = u64;

/// Topic every peer is subscribed to on open.
pub const GLOBAL_TOPIC: &str = "GLOBAL";

/// A live transport connection: the handle the dispatcher writes through.
///
/// Outbound frames go into an unbounded channel drained by the socket's
/// writer task, so fan-out never blocks the dispatch path.
#[derive(Debug)]
pub struct Peer {
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
    topics: HashSet<String>,
}

impl Peer {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            tx,
            topics: HashSet::new(),
        }
    }

    /// Queue a message for this peer. A send to a closed channel means the
    /// writer task already exited; the registry entry is cleaned up by the
    /// close path, so the failure is only logged.
    pub fn send(&self, message: &ServerMessage) {
        self.send_raw(encode_server(message));
    }

    fn send_raw(&self, frame: String) {
        if self.tx.send(frame).is_err() {
            debug!(peer_id = self.id, "send to closed peer channel dropped");
        }
    }

    /// Subscribe to a topic. Topic membership is tracked for future
    /// topic-scoped unicast; broadcasts currently use the global topic.
    pub fn subscribe(&mut self, topic: &str) {
        self.topics.insert(topic.to_string());
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }
}

/// Registry of live connections, keyed by connection id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<ConnectionId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Register a new connection under a fresh random id and subscribe it to
    /// the global broadcast topic.
    pub fn register(&mut self, tx: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = loop {
            let candidate = rand::random::<ConnectionId>();
            if !self.peers.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut peer = Peer::new(id, tx);
        peer.subscribe(GLOBAL_TOPIC);
        self.peers.insert(id, peer);

        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    /// Queue a message to a single peer, if it is still connected.
    pub fn send_to(&self, id: ConnectionId, message: &ServerMessage) {
        if let Some(peer) = self.peers.get(&id) {
            peer.send(message);
        }
    }

    /// Queue a message to every live connection. The frame is serialized
    /// once and cloned per peer.
    pub fn broadcast(&self, message: &ServerMessage) {
        let frame = encode_server(message);
        for peer in self.peers.values() {
            peer.send_raw(frame.clone());
        }
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.peers.keys().copied().collect()
    }
}
