use std::error::Error;

use futures::future::join_all;
use futures::AsyncWriteExt;
use libp2p::PeerId;
use libp2p_stream::Control;

use crate::common::ChatEnvelope;
use crate::relay_http::RelayApi;

use super::chat::CHAT_PROTOCOL;
use super::state::SharedState;

type SendError = Box<dyn Error + Send + Sync>;

/// Tiered outbound delivery: a direct chat stream when the target is
/// currently connected (LAN or circuit), falling through to the relay's
/// store-and-forward queue otherwise.
#[derive(Clone)]
pub struct Router {
    control: Control,
    api: RelayApi,
    state: SharedState,
    local_peer_id: PeerId,
}

impl Router {
    pub fn new(control: Control, api: RelayApi, state: SharedState, local_peer_id: PeerId) -> Self {
        Self {
            control,
            api,
            state,
            local_peer_id,
        }
    }

    /// Deliver one envelope to one peer. `sent` counts any successful tier;
    /// `sendFail` counts only messages both tiers failed to place.
    pub async fn send_to(&self, target: PeerId, envelope: &ChatEnvelope) -> Result<(), SendError> {
        let payload = serde_json::to_string(envelope)?;

        let directly_connected = self
            .state
            .lock()
            .expect("state lock poisoned")
            .is_connected(&target);

        if directly_connected {
            match self.try_direct(target, &payload).await {
                Ok(()) => {
                    self.state.lock().expect("state lock poisoned").stats.sent += 1;
                    return Ok(());
                }
                Err(err) => {
                    log::debug!("Direct send to {} failed, trying relay: {}", target, err);
                }
            }
        }

        match self.try_relay(target, &envelope.channel_id, &payload).await {
            Ok(()) => {
                self.state.lock().expect("state lock poisoned").stats.sent += 1;
                Ok(())
            }
            Err(err) => {
                self.state
                    .lock()
                    .expect("state lock poisoned")
                    .stats
                    .send_fail += 1;
                Err(err)
            }
        }
    }

    /// Fan one envelope out to every connected or known chat peer.
    pub async fn broadcast(&self, envelope: &ChatEnvelope) {
        let targets = self
            .state
            .lock()
            .expect("state lock poisoned")
            .send_targets(&self.local_peer_id);

        if targets.is_empty() {
            log::debug!("Broadcast on {} has no targets", envelope.channel_id);
            return;
        }

        let outcomes = join_all(targets.into_iter().map(|target| {
            let router = self.clone();
            let envelope = envelope.clone();
            async move { (target, router.send_to(target, &envelope).await) }
        }))
        .await;

        for (target, outcome) in outcomes {
            match outcome {
                Ok(()) => log::debug!("Broadcast delivered to {}", target),
                Err(err) => log::warn!("Broadcast to {} failed: {}", target, err),
            }
        }
    }

    /// One envelope per stream: open, write `payload\n`, close.
    async fn try_direct(&self, target: PeerId, payload: &str) -> Result<(), SendError> {
        let mut control = self.control.clone();
        let mut stream = control.open_stream(target, CHAT_PROTOCOL).await?;

        let mut framed = String::with_capacity(payload.len() + 1);
        framed.push_str(payload);
        framed.push('\n');
        stream.write_all(framed.as_bytes()).await?;
        stream.close().await?;
        Ok(())
    }

    async fn try_relay(
        &self,
        target: PeerId,
        channel_id: &str,
        payload: &str,
    ) -> Result<(), SendError> {
        self.api
            .send(
                &target.to_string(),
                &self.local_peer_id.to_string(),
                channel_id,
                payload,
            )
            .await?;
        Ok(())
    }
}
