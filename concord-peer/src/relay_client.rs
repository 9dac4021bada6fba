use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, timeout, Instant, MissedTickBehavior};

use crate::common::ControllerEvent;
use crate::network::state::SharedState;
use crate::relay_http::{QueuedMessage, RelayApi};

/// Store-and-forward messages are fetched on a short cadence so a resumed
/// peer sees queued traffic within about a poll period.
const POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Registration starts after a grace period that lets the circuit
/// reservation settle, then retries until the relay accepts.
const REGISTER_DELAY: Duration = Duration::from_secs(3);
const REGISTER_RETRY: Duration = Duration::from_secs(10);

const RECONNECT_INITIAL: Duration = Duration::from_secs(5);
const RECONNECT_STEADY: Duration = Duration::from_secs(15);
const RECONNECT_DIAL_WAIT: Duration = Duration::from_secs(10);

/// Consecutive poll failures logged before going quiet.
const POLL_ERROR_LOG_LIMIT: u32 = 3;

/// Relay-link notifications from the swarm loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayLink {
    Connected,
    Disconnected,
}

/// Background half of the peer's relationship with the rendezvous relay:
/// invite-code registration, the message-queue poll loop, and reconnection
/// after the relay drops.
pub struct RelayClient {
    api: RelayApi,
    state: SharedState,
    events: mpsc::Sender<ControllerEvent>,
    link_rx: mpsc::Receiver<RelayLink>,
    dial_tx: mpsc::Sender<Multiaddr>,
    local_peer_id: PeerId,
}

impl RelayClient {
    pub fn new(
        api: RelayApi,
        state: SharedState,
        events: mpsc::Sender<ControllerEvent>,
        link_rx: mpsc::Receiver<RelayLink>,
        dial_tx: mpsc::Sender<Multiaddr>,
        local_peer_id: PeerId,
    ) -> Self {
        Self {
            api,
            state,
            events,
            link_rx,
            dial_tx,
            local_peer_id,
        }
    }

    pub async fn run(mut self) {
        let mut poll_ticker = interval(POLL_INTERVAL);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut register_ticker =
            interval_at(Instant::now() + REGISTER_DELAY, REGISTER_RETRY);
        let mut consecutive_poll_errors: u32 = 0;

        loop {
            tokio::select! {
                _ = register_ticker.tick() => {
                    if self.needs_registration() {
                        self.try_register().await;
                    }
                }
                _ = poll_ticker.tick() => {
                    self.poll_once(&mut consecutive_poll_errors).await;
                }
                link = self.link_rx.recv() => {
                    match link {
                        Some(RelayLink::Disconnected) => self.reconnect().await,
                        Some(RelayLink::Connected) => {}
                        None => break,
                    }
                }
            }
        }
    }

    fn needs_registration(&self) -> bool {
        let state = self.state.lock().expect("state lock poisoned");
        state.relay_info.is_some() && state.invite_code.is_none()
    }

    fn relay_available(&self) -> bool {
        self.state
            .lock()
            .expect("state lock poisoned")
            .relay_info
            .is_some()
    }

    async fn try_register(&self) {
        match self.api.register(&self.local_peer_id.to_string()).await {
            Ok(response) => {
                log::info!("Registered invite code {}", response.code);
                self.state
                    .lock()
                    .expect("state lock poisoned")
                    .invite_code = Some(response.code.clone());
                let _ = self
                    .events
                    .send(ControllerEvent::InviteCode {
                        code: response.code,
                    })
                    .await;
            }
            Err(err) => {
                log::warn!("Invite-code registration failed, will retry: {}", err);
            }
        }
    }

    async fn poll_once(&self, consecutive_errors: &mut u32) {
        if !self.relay_available() {
            return;
        }

        match self.api.poll(&self.local_peer_id.to_string(), 0).await {
            Ok(messages) => {
                if *consecutive_errors >= POLL_ERROR_LOG_LIMIT {
                    log::info!("Relay poll recovered after {} failures", consecutive_errors);
                }
                *consecutive_errors = 0;
                for message in messages {
                    self.deliver(message).await;
                }
            }
            Err(err) => {
                *consecutive_errors += 1;
                if *consecutive_errors <= POLL_ERROR_LOG_LIMIT {
                    log::warn!(
                        "Relay poll failed ({}/{} logged): {}",
                        consecutive_errors,
                        POLL_ERROR_LOG_LIMIT,
                        err
                    );
                }
            }
        }
    }

    async fn deliver(&self, message: QueuedMessage) {
        let (channel_id, data) = unwrap_queued_payload(&message);
        self.state.lock().expect("state lock poisoned").stats.recv += 1;
        let _ = self
            .events
            .send(ControllerEvent::Message {
                from: message.from,
                channel_id,
                data,
            })
            .await;
    }

    /// The relay dropped us: back off, re-fetch `/info`, ask the swarm loop
    /// to dial, and refresh the registration once the link is back.
    async fn reconnect(&mut self) {
        let mut backoff = RECONNECT_INITIAL;
        log::info!("Relay connection lost, reconnecting in {:?}", backoff);

        loop {
            tokio::time::sleep(backoff).await;
            backoff = RECONNECT_STEADY;

            let info = match self.api.info().await {
                Ok(info) => info,
                Err(err) => {
                    log::warn!("Relay info fetch failed, retrying in {:?}: {}", backoff, err);
                    continue;
                }
            };

            let addr: Multiaddr = match info.external_relay_addr.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("Relay advertised an unusable address: {}", err);
                    continue;
                }
            };

            {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.relay_peer_id = info.relay_peer_id.parse().ok();
                state.relay_info = Some(info);
            }

            if self.dial_tx.send(addr).await.is_err() {
                return;
            }

            if self.wait_for_link().await {
                log::info!("Relay connection re-established");
                self.try_register().await;
                return;
            }
            log::warn!("Relay dial did not complete, retrying in {:?}", backoff);
        }
    }

    async fn wait_for_link(&mut self) -> bool {
        let wait = async {
            while let Some(link) = self.link_rx.recv().await {
                if link == RelayLink::Connected {
                    return true;
                }
            }
            false
        };
        timeout(RECONNECT_DIAL_WAIT, wait).await.unwrap_or(false)
    }
}

/// Relay-forwarded payloads are usually a full chat envelope stuffed into
/// the queue's `data` field; unwrap it when it parses, otherwise fall back
/// to the outer fields.
pub fn unwrap_queued_payload(message: &QueuedMessage) -> (String, String) {
    if let Ok(envelope) = serde_json::from_str::<crate::common::ChatEnvelope>(&message.data) {
        (envelope.channel_id, envelope.data)
    } else {
        (message.channel_id.clone(), message.data.clone())
    }
}
