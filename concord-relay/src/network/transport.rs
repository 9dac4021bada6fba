use std::error::Error;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade::Version;
use libp2p::{dns, identity, noise, tcp, websocket, PeerId, Transport};

/// WebSocket-over-TCP transport with DNS resolution, noise encryption and
/// yamux multiplexing. Peers dial the relay by its `/dns4/.../ws` address.
pub fn build_transport(
    local_key: &identity::Keypair,
) -> Result<Boxed<(PeerId, StreamMuxerBox)>, Box<dyn Error>> {
    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let ws_transport = websocket::WsConfig::new(dns::tokio::Transport::system(tcp_transport)?);

    let transport = ws_transport
        .upgrade(Version::V1)
        .authenticate(noise::Config::new(local_key)?)
        .multiplex(libp2p::yamux::Config::default())
        .boxed();

    Ok(transport)
}
