use serde::{Deserialize, Serialize};

/// Wire format between peers on the chat protocol: one newline-terminated
/// JSON envelope per message. `data` is opaque to the core; applications put
/// their full signed message inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    pub channel_id: String,
    pub data: String,
}

/// One tracked overlay connection, as reported in `net_stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub remote_peer_id: String,
    pub remote_addr: String,
    pub direction: ConnectionDirection,
    pub streams: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

/// Monotonic delivery counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub sent: u64,
    pub send_fail: u64,
    pub recv: u64,
    pub recv_fail: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let envelope = ChatEnvelope {
            channel_id: "general".to_string(),
            data: "{\"text\":\"hi\"}".to_string(),
        };
        let encoded = serde_json::to_string(&envelope).expect("serialize");
        assert!(encoded.contains("\"channelId\""));
        let decoded: ChatEnvelope = serde_json::from_str(&encoded).expect("parse");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let encoded = serde_json::to_string(&Stats::default()).expect("serialize");
        assert!(encoded.contains("\"sendFail\""));
        assert!(encoded.contains("\"recvFail\""));
    }
}
