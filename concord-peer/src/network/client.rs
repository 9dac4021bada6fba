use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use libp2p::core::transport::ListenerId;
use libp2p::identify;
use libp2p::mdns;
use libp2p::multiaddr::Protocol;
use libp2p::relay::client;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::common::{
    ChatEnvelope, ConnectionDirection, ConnectionInfo, ControllerCommand, ControllerEvent,
};
use crate::config;
use crate::identity;
use crate::known_peers::KnownPeers;
use crate::relay_client::{RelayClient, RelayLink};
use crate::relay_http::RelayApi;

use super::behavior::{build_behavior, PeerBehavior, PeerBehaviorEvent};
use super::chat::{self, CHAT_PROTOCOL};
use super::router::Router;
use super::state::{self, SharedState};
use super::transport::build_transport;

const NET_STATS_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// The peer node: owns the swarm, reacts to controller commands and overlay
/// events, and emits the event stream the controller renders.
pub struct PeerNode {
    event_sender: mpsc::Sender<ControllerEvent>,
    command_receiver: mpsc::Receiver<ControllerCommand>,
    state: SharedState,
    data_dir: PathBuf,
    local_peer_id: Option<PeerId>,
    is_ephemeral: bool,
    api: Option<RelayApi>,
    dial_tx: Option<mpsc::Sender<Multiaddr>>,
    link_tx: Option<mpsc::Sender<RelayLink>>,
    known_peers: Option<KnownPeers>,
    ws_listener: Option<ListenerId>,
    pending_dials: HashMap<PeerId, Multiaddr>,
    ready_emitted: bool,
    listen_retry_used: bool,
}

impl PeerNode {
    pub fn new(
        event_sender: mpsc::Sender<ControllerEvent>,
        command_receiver: mpsc::Receiver<ControllerCommand>,
    ) -> Self {
        Self {
            event_sender,
            command_receiver,
            state: state::shared(),
            data_dir: config::data_dir(),
            local_peer_id: None,
            is_ephemeral: false,
            api: None,
            dial_tx: None,
            link_tx: None,
            known_peers: None,
            ws_listener: None,
            pending_dials: HashMap::new(),
            ready_emitted: false,
            listen_retry_used: false,
        }
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        fs::create_dir_all(&self.data_dir)?;

        let selection = config::resolve_port(&self.data_dir)?;
        let (local_key, is_ephemeral) =
            identity::load_or_create(&self.data_dir, selection.conflict);
        self.is_ephemeral = is_ephemeral;

        let local_peer_id = PeerId::from(local_key.public());
        self.local_peer_id = Some(local_peer_id);
        log::info!("Local PeerID: {local_peer_id:?}");

        let api = RelayApi::new(config::relay_http_url())?;
        self.api = Some(api.clone());

        // Best effort: without the relay there is no invite code and no
        // circuit listen address, but LAN chat still works.
        let relay_info = match api.info().await {
            Ok(info) => {
                log::info!("Relay {} at {}", info.relay_peer_id, info.external_relay_addr);
                Some(info)
            }
            Err(err) => {
                log::warn!("Relay info unavailable ({}); continuing without it", err);
                None
            }
        };

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.port = selection.port;
            state.relay_peer_id = relay_info
                .as_ref()
                .and_then(|info| info.relay_peer_id.parse().ok());
            state.relay_info = relay_info.clone();
        }

        let (transport, relay_behaviour) = build_transport(&local_key, local_peer_id)?;
        let behavior = build_behavior(&local_key, local_peer_id, relay_behaviour)?;
        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor()
                .with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
        );

        let mut control = swarm.behaviour().stream.new_control();
        let incoming = control
            .accept(CHAT_PROTOCOL)
            .map_err(|err| format!("Failed to register chat protocol: {err}"))?;
        chat::spawn_inbound_handler(incoming, self.event_sender.clone(), self.state.clone());

        let ws_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}/ws", selection.port).parse()?;
        self.ws_listener = Some(swarm.listen_on(ws_addr)?);

        if let Some(info) = &relay_info {
            match info.external_relay_addr.parse::<Multiaddr>() {
                Ok(addr) => {
                    let circuit = addr.with(Protocol::P2pCircuit);
                    match swarm.listen_on(circuit.clone()) {
                        Ok(_) => log::info!("Requested circuit listen via {}", circuit),
                        Err(err) => log::warn!("Circuit listen on {} failed: {}", circuit, err),
                    }
                }
                Err(err) => log::warn!("Relay advertised an unusable address: {}", err),
            }
        }

        let router = Router::new(control, api.clone(), self.state.clone(), local_peer_id);

        let (link_tx, link_rx) = mpsc::channel(16);
        let (dial_tx, mut dial_rx) = mpsc::channel(16);
        self.link_tx = Some(link_tx);
        self.dial_tx = Some(dial_tx.clone());
        tokio::spawn(
            RelayClient::new(
                api,
                self.state.clone(),
                self.event_sender.clone(),
                link_rx,
                dial_tx,
                local_peer_id,
            )
            .run(),
        );

        self.known_peers = Some(KnownPeers::load(&self.data_dir));

        let mut stats_ticker = interval(NET_STATS_INTERVAL);
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("Network event loop started");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command, &mut swarm, &router).await,
                        None => {
                            log::info!("Controller closed the command stream, shutting down");
                            break;
                        }
                    }
                }
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut swarm).await?;
                }
                addr = dial_rx.recv() => {
                    if let Some(addr) = addr {
                        if let Err(err) = swarm.dial(addr.clone()) {
                            log::warn!("Dial of {} failed: {}", addr, err);
                        }
                    }
                }
                _ = stats_ticker.tick() => {
                    self.emit_net_stats().await;
                }
            }
        }

        Ok(())
    }

    async fn handle_command(
        &mut self,
        command: ControllerCommand,
        swarm: &mut Swarm<PeerBehavior>,
        router: &Router,
    ) {
        match command {
            ControllerCommand::Send {
                channel_id,
                data,
                target_peer_id,
            } => {
                let envelope = ChatEnvelope { channel_id, data };
                match target_peer_id {
                    Some(target) => match target.parse::<PeerId>() {
                        Ok(peer) => {
                            let router = router.clone();
                            tokio::spawn(async move {
                                if let Err(err) = router.send_to(peer, &envelope).await {
                                    log::warn!("Send to {} failed: {}", peer, err);
                                }
                            });
                        }
                        Err(err) => {
                            self.emit_log(format!("Invalid target peer id {target}: {err}"))
                                .await;
                        }
                    },
                    None => {
                        let router = router.clone();
                        tokio::spawn(async move { router.broadcast(&envelope).await });
                    }
                }
            }
            ControllerCommand::Dial { address } => {
                let address = address.trim().to_string();
                if is_invite_code(&address) {
                    self.dial_invite_code(address).await;
                } else if address.starts_with('/') {
                    self.dial_address(&address, swarm).await;
                } else {
                    self.emit(ControllerEvent::DialResult {
                        ok: false,
                        peer_id: None,
                        error: Some("Invalid address".to_string()),
                    })
                    .await;
                }
            }
            ControllerCommand::Status => {
                let (addresses, connected_peers) = {
                    let state = self.state.lock().expect("state lock poisoned");
                    (
                        self.published_addresses(&state.listen_addrs),
                        state
                            .connections
                            .keys()
                            .map(|peer| peer.to_string())
                            .collect(),
                    )
                };
                self.emit(ControllerEvent::Status {
                    peer_id: self.peer_id_string(),
                    addresses,
                    connected_peers,
                })
                .await;
            }
        }
    }

    /// Resolve an invite code through the relay, remember the peer, and try
    /// a circuit dial. The dial is best-effort: even if it fails, the peer
    /// is now addressable through the relay queue.
    async fn dial_invite_code(&self, code: String) {
        let Some(api) = self.api.clone() else {
            return;
        };
        let state = self.state.clone();
        let events = self.event_sender.clone();
        let dial_tx = self.dial_tx.clone();

        tokio::spawn(async move {
            match api.lookup(&code).await {
                Ok(response) => {
                    if let Ok(peer) = response.peer_id.parse::<PeerId>() {
                        state
                            .lock()
                            .expect("state lock poisoned")
                            .known_chat_peers
                            .insert(peer);
                    }
                    match response.circuit_addr.parse::<Multiaddr>() {
                        Ok(addr) => {
                            if let Some(dial_tx) = dial_tx {
                                let _ = dial_tx.send(addr).await;
                            }
                        }
                        Err(err) => {
                            log::warn!("Circuit address for {} is unusable: {}", code, err);
                        }
                    }
                    let _ = events
                        .send(ControllerEvent::DialResult {
                            ok: true,
                            peer_id: Some(response.peer_id),
                            error: None,
                        })
                        .await;
                }
                Err(err) => {
                    let _ = events
                        .send(ControllerEvent::DialResult {
                            ok: false,
                            peer_id: None,
                            error: Some(format!("Lookup failed: {err}")),
                        })
                        .await;
                }
            }
        });
    }

    async fn dial_address(&mut self, address: &str, swarm: &mut Swarm<PeerBehavior>) {
        match address.parse::<Multiaddr>() {
            Ok(addr) => {
                let target = {
                    let mut probe = addr.clone();
                    match probe.pop() {
                        Some(Protocol::P2p(peer)) => Some(peer),
                        _ => None,
                    }
                };

                match swarm.dial(addr.clone()) {
                    Ok(()) => match target {
                        Some(peer) => {
                            // dial_result follows once the connection settles.
                            self.pending_dials.insert(peer, addr);
                        }
                        None => {
                            self.emit(ControllerEvent::DialResult {
                                ok: true,
                                peer_id: None,
                                error: None,
                            })
                            .await;
                        }
                    },
                    Err(err) => {
                        self.emit(ControllerEvent::DialResult {
                            ok: false,
                            peer_id: None,
                            error: Some(err.to_string()),
                        })
                        .await;
                    }
                }
            }
            Err(err) => {
                self.emit(ControllerEvent::DialResult {
                    ok: false,
                    peer_id: None,
                    error: Some(format!("Invalid address: {err}")),
                })
                .await;
            }
        }
    }

    async fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<PeerBehaviorEvent>,
        swarm: &mut Swarm<PeerBehavior>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        match event {
            SwarmEvent::Behaviour(PeerBehaviorEvent::Identify(event)) => {
                if let identify::Event::Received { peer_id, info, .. } = event {
                    log::debug!(
                        "Identify info from {peer_id}: {} listen addrs",
                        info.listen_addrs.len()
                    );
                }
            }
            SwarmEvent::Behaviour(PeerBehaviorEvent::Mdns(event)) => {
                self.handle_mdns_event(event, swarm);
            }
            SwarmEvent::Behaviour(PeerBehaviorEvent::RelayClient(event)) => {
                if let client::Event::ReservationReqAccepted { relay_peer_id, .. } = event {
                    log::info!("Relay reservation accepted by {}", relay_peer_id);
                } else {
                    log::debug!("Relay client event: {:?}", event);
                }
            }
            SwarmEvent::Behaviour(PeerBehaviorEvent::Stream) => {}
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address:?}");
                self.state
                    .lock()
                    .expect("state lock poisoned")
                    .listen_addrs
                    .push(address);
                if !self.ready_emitted {
                    self.ready_emitted = true;
                    self.emit_ready().await;
                    self.autodial_known_peers(swarm);
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                endpoint,
                num_established,
                ..
            } => {
                self.on_connection_established(peer_id, &endpoint, num_established.get())
                    .await;
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    self.on_connection_closed(peer_id).await;
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                log::debug!("Outgoing connection error ({:?}): {}", peer_id, error);
                if let Some(peer) = peer_id {
                    if self.pending_dials.remove(&peer).is_some() {
                        self.emit(ControllerEvent::DialResult {
                            ok: false,
                            peer_id: Some(peer.to_string()),
                            error: Some(error.to_string()),
                        })
                        .await;
                    }
                }
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                if let Err(err) = reason {
                    self.on_listener_failed(listener_id, err.to_string(), swarm)
                        .await?;
                }
            }
            SwarmEvent::ListenerError { listener_id, error } => {
                log::warn!("Listener {:?} error: {}", listener_id, error);
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_mdns_event(&mut self, event: mdns::Event, swarm: &mut Swarm<PeerBehavior>) {
        match event {
            mdns::Event::Discovered(peers) => {
                for (peer_id, addr) in peers {
                    if Some(peer_id) == self.local_peer_id {
                        continue;
                    }
                    log::info!("mDNS discovered {peer_id} at {addr}");
                    if let Err(err) = swarm.dial(addr) {
                        log::debug!("mDNS dial of {peer_id} failed: {err}");
                    }
                }
            }
            mdns::Event::Expired(peers) => {
                for (peer_id, _addr) in peers {
                    log::debug!("mDNS entry for {peer_id} expired");
                }
            }
        }
    }

    async fn on_connection_established(
        &mut self,
        peer_id: PeerId,
        endpoint: &libp2p::core::ConnectedPoint,
        connection_count: u32,
    ) {
        let remote_addr = endpoint.get_remote_address().to_string();
        let outbound = endpoint.is_dialer();
        let is_relay = self
            .state
            .lock()
            .expect("state lock poisoned")
            .relay_peer_id
            == Some(peer_id);

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.connections.insert(
                peer_id,
                ConnectionInfo {
                    remote_peer_id: peer_id.to_string(),
                    remote_addr: remote_addr.clone(),
                    direction: if outbound {
                        ConnectionDirection::Outbound
                    } else {
                        ConnectionDirection::Inbound
                    },
                    streams: connection_count,
                },
            );
            if !is_relay {
                state.known_chat_peers.insert(peer_id);
            }
        }

        if is_relay {
            if let Some(link_tx) = &self.link_tx {
                let _ = link_tx.try_send(RelayLink::Connected);
            }
        } else if outbound {
            if let Some(known_peers) = &mut self.known_peers {
                known_peers.add(&remote_addr);
            }
        }

        if let Some(addr) = self.pending_dials.remove(&peer_id) {
            log::info!("Dial of {} via {} succeeded", peer_id, addr);
            self.emit(ControllerEvent::DialResult {
                ok: true,
                peer_id: Some(peer_id.to_string()),
                error: None,
            })
            .await;
        }

        self.emit(ControllerEvent::PeerConnect {
            peer_id: peer_id.to_string(),
        })
        .await;
    }

    /// The peer stays in `known_chat_peers` on disconnect: NAT'd peers are
    /// still reachable through the relay queue.
    async fn on_connection_closed(&mut self, peer_id: PeerId) {
        let is_relay = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.connections.remove(&peer_id);
            state.relay_peer_id == Some(peer_id)
        };

        if is_relay {
            log::warn!("Lost connection to the relay");
            if let Some(link_tx) = &self.link_tx {
                let _ = link_tx.try_send(RelayLink::Disconnected);
            }
        }

        self.emit(ControllerEvent::PeerDisconnect {
            peer_id: peer_id.to_string(),
        })
        .await;
    }

    /// One fresh-port retry when the WebSocket listener dies before the node
    /// is up; a second failure is a startup error.
    async fn on_listener_failed(
        &mut self,
        listener_id: ListenerId,
        error: String,
        swarm: &mut Swarm<PeerBehavior>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if Some(listener_id) != self.ws_listener {
            log::warn!("Listener {:?} closed: {}", listener_id, error);
            return Ok(());
        }

        if self.ready_emitted || self.listen_retry_used {
            self.emit(ControllerEvent::Error {
                message: format!("Listen failed: {error}"),
            })
            .await;
            return Err(error.into());
        }

        log::warn!("Listen failed ({}), retrying once on a fresh port", error);
        self.listen_retry_used = true;
        config::forget_port(&self.data_dir);

        let selection = config::resolve_port(&self.data_dir)?;
        self.state.lock().expect("state lock poisoned").port = selection.port;

        let ws_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}/ws", selection.port).parse()?;
        self.ws_listener = Some(swarm.listen_on(ws_addr)?);
        Ok(())
    }

    fn autodial_known_peers(&mut self, swarm: &mut Swarm<PeerBehavior>) {
        let Some(known_peers) = &self.known_peers else {
            return;
        };
        for address in known_peers.addresses() {
            match address.parse::<Multiaddr>() {
                Ok(addr) => {
                    log::debug!("Auto-dialing known peer at {}", addr);
                    let _ = swarm.dial(addr);
                }
                Err(err) => log::debug!("Skipping stale known peer {}: {}", address, err),
            }
        }
    }

    async fn emit_ready(&self) {
        let (port, lan_address) = {
            let state = self.state.lock().expect("state lock poisoned");
            (state.port, lan_listen_addr(&state.listen_addrs))
        };
        let peer_id = self.peer_id_string();

        self.emit(ControllerEvent::Ready {
            address: format!("/ip4/127.0.0.1/tcp/{}/ws/p2p/{}", port, peer_id),
            lan_address: lan_address.map(|addr| format!("{}/p2p/{}", addr, peer_id)),
            port,
            peer_id,
            is_ephemeral: self.is_ephemeral,
            invite_code: None,
        })
        .await;
    }

    async fn emit_net_stats(&self) {
        let event = {
            let state = self.state.lock().expect("state lock poisoned");
            let mut known_peers: Vec<String> = state
                .connections
                .keys()
                .chain(state.known_chat_peers.iter())
                .map(|peer| peer.to_string())
                .collect();
            known_peers.sort();
            known_peers.dedup();

            ControllerEvent::NetStats {
                port: state.port,
                addresses: self.published_addresses(&state.listen_addrs),
                connections: state.connections.values().cloned().collect(),
                known_peers,
                stats: state.stats,
                invite_code: state.invite_code.clone(),
            }
        };
        self.emit(event).await;
    }

    fn published_addresses(&self, listen_addrs: &[Multiaddr]) -> Vec<String> {
        let peer_id = self.peer_id_string();
        listen_addrs
            .iter()
            .map(|addr| format!("{}/p2p/{}", addr, peer_id))
            .collect()
    }

    fn peer_id_string(&self) -> String {
        self.local_peer_id
            .map(|peer| peer.to_string())
            .unwrap_or_default()
    }

    async fn emit(&self, event: ControllerEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("Failed to emit event: {err}");
        }
    }

    async fn emit_log(&self, message: String) {
        self.emit(ControllerEvent::Log { message }).await;
    }
}

/// `XXXX-XXXX`, case-insensitive; the generation alphabet is narrower but
/// lookup accepts any alphanumerics.
fn is_invite_code(address: &str) -> bool {
    let bytes = address.as_bytes();
    bytes.len() == 9
        && bytes[4] == b'-'
        && bytes[..4]
            .iter()
            .chain(bytes[5..].iter())
            .all(|b| b.is_ascii_alphanumeric())
}

/// First non-loopback IPv4 listen address, if any interface is bound yet.
fn lan_listen_addr(listen_addrs: &[Multiaddr]) -> Option<Multiaddr> {
    listen_addrs
        .iter()
        .find(|addr| {
            addr.iter().any(|component| {
                matches!(component, Protocol::Ip4(ip) if ip != Ipv4Addr::LOCALHOST && !ip.is_unspecified())
            })
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_are_recognized() {
        assert!(is_invite_code("ABCD-WXYZ"));
        assert!(is_invite_code("abcd-wxyz"));
        assert!(is_invite_code("A2C4-W6Y8"));

        assert!(!is_invite_code("ABCD-WXY"));
        assert!(!is_invite_code("ABCDWXYZ9"));
        assert!(!is_invite_code("ABCD_WXYZ"));
        assert!(!is_invite_code("/ip4/127.0.0.1/tcp/9100/ws"));
        assert!(!is_invite_code(""));
    }

    #[test]
    fn lan_listen_addr_skips_loopback_and_wildcard() {
        let addrs: Vec<Multiaddr> = vec![
            "/ip4/127.0.0.1/tcp/9100/ws".parse().unwrap(),
            "/ip4/0.0.0.0/tcp/9100/ws".parse().unwrap(),
            "/ip4/192.168.1.20/tcp/9100/ws".parse().unwrap(),
        ];
        assert_eq!(
            lan_listen_addr(&addrs),
            Some("/ip4/192.168.1.20/tcp/9100/ws".parse().unwrap())
        );

        let loopback_only: Vec<Multiaddr> = vec!["/ip4/127.0.0.1/tcp/9100/ws".parse().unwrap()];
        assert_eq!(lan_listen_addr(&loopback_only), None);
    }
}
