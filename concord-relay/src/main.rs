use std::error::Error;
use std::future::IntoFuture;
use std::time::Duration;

use chrono::Utc;
use dotenvy::dotenv;
use libp2p::PeerId;
use tokio::signal;
use tokio::time::interval;

use concord_relay::network::{node, RelayNode};
use concord_relay::{app, RelayConfig, RelayState};

const CODE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const QUEUE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let config = RelayConfig::from_env();
    log::info!(
        "Starting Concord relay (ws: {}, http: {}, hostname: {})",
        config.ws_port,
        config.http_port,
        config.hostname
    );

    let local_key = node::load_or_generate_key()?;
    let relay_peer_id = PeerId::from(local_key.public());
    let external_addr = config.external_addr(&relay_peer_id.to_string());
    log::info!("External relay address: {}", external_addr);

    let state = RelayState::new(relay_peer_id.to_string(), external_addr);
    spawn_sweepers(&state);

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    log::info!("HTTP API listening on port {}", config.http_port);
    let http_server = axum::serve(listener, app(state.clone())).into_future();

    let mut overlay = RelayNode::new(local_key, config.ws_port, state.relay_addrs.clone());

    tokio::select! {
        result = overlay.run() => {
            if let Err(err) = result {
                log::error!("Relay overlay error: {}", err);
                return Err(err);
            }
        }
        result = http_server => {
            if let Err(err) = result {
                log::error!("HTTP server error: {}", err);
                return Err(err.into());
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping relay...");
        }
    }

    Ok(())
}

/// Background sweeps for expired invite codes and queued messages. The tasks
/// stop when the runtime shuts down after the main select returns.
fn spawn_sweepers(state: &RelayState) {
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let mut ticker = interval(CODE_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut registry = registry.lock().expect("registry lock poisoned");
            let before = registry.len();
            registry.sweep(Utc::now().timestamp_millis());
            let swept = before - registry.len();
            if swept > 0 {
                log::info!("Swept {} expired invite code(s), {} live", swept, registry.len());
            }
        }
    });

    let queue = state.queue.clone();
    tokio::spawn(async move {
        let mut ticker = interval(QUEUE_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            queue
                .lock()
                .expect("queue lock poisoned")
                .sweep(Utc::now().timestamp_millis());
        }
    });
}
