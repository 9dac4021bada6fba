use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use libp2p::{Multiaddr, PeerId};

use crate::common::{ConnectionInfo, Stats};
use crate::relay_http::RelayInfo;

/// State shared between the swarm loop, the relay client task, the outbound
/// router, and inbound stream handlers. One mutex serializes all mutation;
/// every critical section is a handful of map operations.
#[derive(Default)]
pub struct NodeState {
    pub connections: HashMap<PeerId, ConnectionInfo>,
    /// Peers this node has learned about and treats as send targets even
    /// while disconnected; relay-queued messages keep NAT'd peers reachable.
    pub known_chat_peers: HashSet<PeerId>,
    pub stats: Stats,
    pub invite_code: Option<String>,
    pub relay_info: Option<RelayInfo>,
    pub relay_peer_id: Option<PeerId>,
    pub listen_addrs: Vec<Multiaddr>,
    pub port: u16,
}

pub type SharedState = Arc<Mutex<NodeState>>;

pub fn shared() -> SharedState {
    Arc::new(Mutex::new(NodeState::default()))
}

impl NodeState {
    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.connections.contains_key(peer_id)
    }

    /// Broadcast targets: every connected or previously seen chat peer,
    /// excluding the relay and ourselves.
    pub fn send_targets(&self, local_peer_id: &PeerId) -> Vec<PeerId> {
        let mut targets: HashSet<PeerId> = self.connections.keys().copied().collect();
        targets.extend(self.known_chat_peers.iter().copied());
        targets.remove(local_peer_id);
        if let Some(relay) = self.relay_peer_id {
            targets.remove(&relay);
        }
        targets.into_iter().collect()
    }
}
