use std::error::Error;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::{Boxed, OrTransport};
use libp2p::core::upgrade::Version;
use libp2p::relay::client;
use libp2p::{dns, identity, noise, tcp, websocket, PeerId, Transport};

/// WebSocket-over-TCP plus relay-circuit transport, noise-encrypted and
/// yamux-multiplexed. The relay half lets this node listen and dial through
/// circuit addresses once a reservation is in place.
pub fn build_transport(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
) -> Result<(Boxed<(PeerId, StreamMuxerBox)>, client::Behaviour), Box<dyn Error + Send + Sync>> {
    let (relay_transport, relay_behaviour) = client::new(local_peer_id);

    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let ws_transport = websocket::WsConfig::new(dns::tokio::Transport::system(tcp_transport)?);

    let transport = OrTransport::new(relay_transport, ws_transport)
        .upgrade(Version::V1)
        .authenticate(noise::Config::new(local_key)?)
        .multiplex(libp2p::yamux::Config::default())
        .boxed();

    Ok((transport, relay_behaviour))
}
