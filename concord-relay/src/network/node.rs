use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use libp2p::futures::StreamExt;
use libp2p::identify;
use libp2p::multiaddr::Protocol;
use libp2p::relay;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{identity, PeerId, Swarm};
use tokio::time::{interval, Duration};

use super::behavior::{build_behavior, RelayBehaviorEvent};
use super::transport::build_transport;

const RELAY_KEY_PATH: &str = "data/relay_key.pk";

/// The overlay half of the relay: accepts circuit reservations from peers
/// behind NAT and forwards bytes between reservation holders.
pub struct RelayNode {
    local_key: identity::Keypair,
    local_peer_id: PeerId,
    ws_port: u16,
    listen_addrs: Arc<Mutex<Vec<String>>>,
    connected: HashSet<PeerId>,
}

impl RelayNode {
    pub fn new(
        local_key: identity::Keypair,
        ws_port: u16,
        listen_addrs: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        let local_peer_id = PeerId::from(local_key.public());
        Self {
            local_key,
            local_peer_id,
            ws_port,
            listen_addrs,
            connected: HashSet::new(),
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn Error>> {
        log::info!("Relay overlay PeerID: {:?}", self.local_peer_id);

        let transport = build_transport(&self.local_key)?;
        let behavior = build_behavior(&self.local_key, self.local_peer_id)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            self.local_peer_id,
            SwarmConfig::with_tokio_executor()
                .with_idle_connection_timeout(Duration::from_secs(300)),
        );

        swarm.listen_on(format!("/ip4/0.0.0.0/tcp/{}/ws", self.ws_port).parse()?)?;
        log::info!(
            "Relay overlay listening on ws port {}, waiting for reservations...",
            self.ws_port
        );

        let mut stats_interval = interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
                _ = stats_interval.tick() => {
                    log::info!("Statistics: {} connected peers", self.connected.len());
                }
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<RelayBehaviorEvent>) {
        match event {
            SwarmEvent::Behaviour(RelayBehaviorEvent::Relay(event)) => {
                self.handle_relay_event(event);
            }
            SwarmEvent::Behaviour(RelayBehaviorEvent::Identify(event)) => {
                if let identify::Event::Received { peer_id, info, .. } = event {
                    log::debug!(
                        "Identify info from {peer_id}: protocols={:?}",
                        info.protocols
                    );
                }
            }
            SwarmEvent::Behaviour(RelayBehaviorEvent::Ping(_)) => {}
            SwarmEvent::NewListenAddr { address, .. } => {
                let full_addr = address.clone().with(Protocol::P2p(self.local_peer_id));
                log::info!("Relay overlay listening on: {}", full_addr);
                self.listen_addrs
                    .lock()
                    .expect("addr lock poisoned")
                    .push(full_addr.to_string());
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                self.connected.insert(peer_id);
                log::info!("Peer connected: {}", peer_id);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    self.connected.remove(&peer_id);
                }
                log::info!("Peer disconnected: {}", peer_id);
            }
            _ => {}
        }
    }

    fn handle_relay_event(&mut self, event: relay::Event) {
        match event {
            relay::Event::ReservationReqAccepted {
                src_peer_id,
                renewed,
            } => {
                log::info!(
                    "Reservation accepted for {} (renewed: {})",
                    src_peer_id,
                    renewed
                );
            }
            relay::Event::ReservationTimedOut { src_peer_id } => {
                log::info!("Reservation timed out for {}", src_peer_id);
            }
            relay::Event::CircuitReqAccepted {
                src_peer_id,
                dst_peer_id,
            } => {
                log::info!("Circuit opened: {} -> {}", src_peer_id, dst_peer_id);
            }
            relay::Event::CircuitClosed {
                src_peer_id,
                dst_peer_id,
                error,
            } => {
                log::info!(
                    "Circuit closed: {} -> {} ({:?})",
                    src_peer_id,
                    dst_peer_id,
                    error
                );
            }
            other => {
                log::debug!("Relay event: {:?}", other);
            }
        }
    }
}

pub fn load_or_generate_key() -> Result<identity::Keypair, Box<dyn Error>> {
    let path = Path::new(RELAY_KEY_PATH);
    if path.exists() {
        let bytes = fs::read(path)?;
        let keypair = identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| format!("Failed to decode relay identity key: {}", e))?;
        log::info!("Loaded persisted relay identity key from {}", RELAY_KEY_PATH);
        Ok(keypair)
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let keypair = identity::Keypair::generate_ed25519();
        let encoded = keypair
            .to_protobuf_encoding()
            .map_err(|e| format!("Failed to encode relay identity key: {}", e))?;
        fs::write(path, encoded)?;
        log::info!("Generated new relay identity key and saved to {}", RELAY_KEY_PATH);
        Ok(keypair)
    }
}
