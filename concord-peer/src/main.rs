use std::error::Error;

use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

use concord_peer::common::{ControllerCommand, ControllerEvent};
use concord_peer::network::PeerNode;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    // Controller commands arrive on stdin; events leave on stdout. Logs stay
    // on stderr so stdout carries nothing but one JSON event per line.
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    let (event_tx, mut event_rx) = mpsc::channel(100);

    let stdin_events = event_tx.clone();
    tokio::spawn(read_commands(cmd_tx, stdin_events));

    let node = PeerNode::new(event_tx, cmd_rx);
    let mut node_task = tokio::spawn(node.run());

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => write_event(&event),
                    None => break,
                }
            }
            result = &mut node_task => {
                match result {
                    Ok(Ok(())) => {
                        while let Ok(event) = event_rx.try_recv() {
                            write_event(&event);
                        }
                        log::info!("Peer node stopped");
                        return Ok(());
                    }
                    Ok(Err(err)) => {
                        write_event(&ControllerEvent::Error {
                            message: err.to_string(),
                        });
                        log::error!("Peer node failed: {err}");
                        std::process::exit(1);
                    }
                    Err(err) => {
                        log::error!("Peer node task panicked: {err}");
                        std::process::exit(1);
                    }
                }
            }
            _ = signal::ctrl_c() => {
                log::info!("Received shutdown signal, stopping peer node...");
                break;
            }
        }
    }

    Ok(())
}

fn write_event(event: &ControllerEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => log::warn!("Failed to encode event: {err}"),
    }
}

/// Parse newline-delimited JSON commands from stdin. Malformed lines become
/// `log` events and are dropped; they never take the process down.
async fn read_commands(
    cmd_tx: mpsc::Sender<ControllerCommand>,
    events: mpsc::Sender<ControllerEvent>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ControllerCommand>(trimmed) {
                    Ok(command) => {
                        if cmd_tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = events
                            .send(ControllerEvent::Log {
                                message: format!("Ignoring malformed command: {err}"),
                            })
                            .await;
                    }
                }
            }
            Ok(None) => {
                log::info!("stdin closed, shutting down");
                break;
            }
            Err(err) => {
                log::warn!("stdin read error: {err}");
                break;
            }
        }
    }
}
