use std::error::Error;
use std::time::Duration;

use libp2p::identify;
use libp2p::ping;
use libp2p::relay;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identity, PeerId};

/// Circuit reservations are capped so a misbehaving swarm of peers cannot
/// exhaust the relay; circuits are bounded in time and bytes, after which
/// the reservation holder must fall back to the HTTP message queue.
const MAX_RESERVATIONS: usize = 256;
const MAX_CIRCUIT_DURATION: Duration = Duration::from_secs(300);
const MAX_CIRCUIT_BYTES: u64 = 16 * 1024 * 1024;

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "RelayBehaviorEvent")]
pub struct RelayBehavior {
    pub relay: relay::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

#[allow(clippy::large_enum_variant)]
pub enum RelayBehaviorEvent {
    Relay(relay::Event),
    Identify(identify::Event),
    Ping(ping::Event),
}

impl From<relay::Event> for RelayBehaviorEvent {
    fn from(event: relay::Event) -> Self {
        RelayBehaviorEvent::Relay(event)
    }
}

impl From<identify::Event> for RelayBehaviorEvent {
    fn from(event: identify::Event) -> Self {
        RelayBehaviorEvent::Identify(event)
    }
}

impl From<ping::Event> for RelayBehaviorEvent {
    fn from(event: ping::Event) -> Self {
        RelayBehaviorEvent::Ping(event)
    }
}

pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
) -> Result<RelayBehavior, Box<dyn Error>> {
    let relay_config = relay::Config {
        max_reservations: MAX_RESERVATIONS,
        max_circuit_duration: MAX_CIRCUIT_DURATION,
        max_circuit_bytes: MAX_CIRCUIT_BYTES,
        ..Default::default()
    };
    let relay_behaviour = relay::Behaviour::new(local_peer_id, relay_config);

    let identify_config =
        identify::Config::new("concord/1.0.0".into(), local_key.public().clone());
    let identify = identify::Behaviour::new(identify_config);

    let ping = ping::Behaviour::new(ping::Config::default());

    Ok(RelayBehavior {
        relay: relay_behaviour,
        identify,
        ping,
    })
}
