use std::error::Error;

use libp2p::identify;
use libp2p::mdns;
use libp2p::relay::client;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identity, PeerId};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "PeerBehaviorEvent")]
pub struct PeerBehavior {
    pub stream: libp2p_stream::Behaviour,
    pub identify: identify::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub relay_client: client::Behaviour,
}

#[allow(clippy::large_enum_variant)]
pub enum PeerBehaviorEvent {
    Stream,
    Identify(identify::Event),
    Mdns(mdns::Event),
    RelayClient(client::Event),
}

impl From<()> for PeerBehaviorEvent {
    fn from(_: ()) -> Self {
        PeerBehaviorEvent::Stream
    }
}

impl From<identify::Event> for PeerBehaviorEvent {
    fn from(event: identify::Event) -> Self {
        PeerBehaviorEvent::Identify(event)
    }
}

impl From<mdns::Event> for PeerBehaviorEvent {
    fn from(event: mdns::Event) -> Self {
        PeerBehaviorEvent::Mdns(event)
    }
}

impl From<client::Event> for PeerBehaviorEvent {
    fn from(event: client::Event) -> Self {
        PeerBehaviorEvent::RelayClient(event)
    }
}

pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
    relay_client: client::Behaviour,
) -> Result<PeerBehavior, Box<dyn Error + Send + Sync>> {
    let stream = libp2p_stream::Behaviour::new();

    let identify_config =
        identify::Config::new("concord/1.0.0".into(), local_key.public().clone());
    let identify = identify::Behaviour::new(identify_config);

    let mdns_behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

    Ok(PeerBehavior {
        stream,
        identify,
        mdns: mdns_behaviour,
        relay_client,
    })
}
