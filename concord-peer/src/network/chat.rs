use std::io;

use futures::{AsyncReadExt, StreamExt};
use libp2p::{PeerId, Stream, StreamProtocol};
use libp2p_stream::IncomingStreams;
use tokio::sync::mpsc;

use crate::common::{ChatEnvelope, ControllerEvent};

use super::state::SharedState;

/// Direct-chat protocol identifier registered on the overlay.
pub const CHAT_PROTOCOL: StreamProtocol = StreamProtocol::new("/concord/chat/1.0.0");

const READ_CHUNK: usize = 4096;

/// Accept inbound chat streams for the lifetime of the node. Each stream is
/// consumed in its own task; streams arriving over limited relay-circuit
/// connections are accepted like any other.
pub fn spawn_inbound_handler(
    mut incoming: IncomingStreams,
    events: mpsc::Sender<ControllerEvent>,
    state: SharedState,
) {
    tokio::spawn(async move {
        while let Some((peer, stream)) = incoming.next().await {
            log::debug!("Inbound chat stream from {}", peer);
            tokio::spawn(handle_stream(peer, stream, events.clone(), state.clone()));
        }
    });
}

/// Consume one stream: buffer chunks, deliver each newline-terminated
/// envelope, and flush whatever remains when the remote closes.
async fn handle_stream(
    peer: PeerId,
    mut stream: Stream,
    events: mpsc::Sender<ControllerEvent>,
    state: SharedState,
) {
    let mut buffer = String::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                for line in take_lines(&mut buffer) {
                    deliver(&peer, &line, &events, &state).await;
                }
            }
            Err(err) => {
                if !is_normal_termination(&err) {
                    log::warn!("Chat stream from {} failed: {}", peer, err);
                }
                break;
            }
        }
    }

    // A final envelope may arrive without its trailing newline.
    let remainder = buffer.trim().to_string();
    if !remainder.is_empty() {
        deliver(&peer, &remainder, &events, &state).await;
    }
}

async fn deliver(
    peer: &PeerId,
    line: &str,
    events: &mpsc::Sender<ControllerEvent>,
    state: &SharedState,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<ChatEnvelope>(line) {
        Ok(envelope) => {
            state.lock().expect("state lock poisoned").stats.recv += 1;
            let _ = events
                .send(ControllerEvent::Message {
                    from: peer.to_string(),
                    channel_id: envelope.channel_id,
                    data: envelope.data,
                })
                .await;
        }
        Err(err) => {
            state.lock().expect("state lock poisoned").stats.recv_fail += 1;
            log::warn!("Discarding malformed chat line from {}: {}", peer, err);
        }
    }
}

/// Drain every complete `\n`-terminated line out of the buffer, leaving any
/// trailing partial line in place.
fn take_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        lines.push(line.trim_end_matches('\n').to_string());
    }
    lines
}

/// Aborted and reset streams are how remotes hang up; they are not errors
/// worth reporting.
fn is_normal_termination(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    ) || {
        let message = err.to_string().to_lowercase();
        message.contains("reset") || message.contains("abort")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_lines_splits_complete_lines_only() {
        let mut buffer = String::from("{\"a\":1}\n{\"b\":2}\npartial");
        let lines = take_lines(&mut buffer);
        assert_eq!(lines, ["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buffer, "partial");
    }

    #[test]
    fn take_lines_handles_chunked_input() {
        let mut buffer = String::new();
        buffer.push_str("{\"channelId\":\"general\",");
        assert!(take_lines(&mut buffer).is_empty());

        buffer.push_str("\"data\":\"hi\"}\n");
        let lines = take_lines(&mut buffer);
        assert_eq!(lines.len(), 1);
        let envelope: ChatEnvelope = serde_json::from_str(&lines[0]).expect("envelope");
        assert_eq!(envelope.channel_id, "general");
        assert_eq!(envelope.data, "hi");
        assert!(buffer.is_empty());
    }

    #[test]
    fn reset_errors_are_suppressed() {
        assert!(is_normal_termination(&io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer"
        )));
        assert!(is_normal_termination(&io::Error::new(
            io::ErrorKind::Other,
            "stream abort requested"
        )));
        assert!(!is_normal_termination(&io::Error::new(
            io::ErrorKind::Other,
            "protocol violation"
        )));
    }
}
