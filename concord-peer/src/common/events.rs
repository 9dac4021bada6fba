use serde::Serialize;

use super::types::{ConnectionInfo, Stats};

/// Events the node emits on stdout, one JSON object per line, discriminated
/// by the `type` field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ControllerEvent {
    /// Overlay is up and listening. `inviteCode` is always null here; it
    /// arrives later via `invite_code` once relay registration succeeds.
    Ready {
        peer_id: String,
        address: String,
        lan_address: Option<String>,
        port: u16,
        is_ephemeral: bool,
        invite_code: Option<String>,
    },
    Message {
        from: String,
        channel_id: String,
        data: String,
    },
    #[serde(rename = "peer:connect")]
    PeerConnect { peer_id: String },
    #[serde(rename = "peer:disconnect")]
    PeerDisconnect { peer_id: String },
    InviteCode { code: String },
    DialResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NetStats {
        port: u16,
        addresses: Vec<String>,
        connections: Vec<ConnectionInfo>,
        known_peers: Vec<String>,
        stats: Stats,
        invite_code: Option<String>,
    },
    Log { message: String },
    Error { message: String },
    Status {
        peer_id: String,
        addresses: Vec<String>,
        connected_peers: Vec<String>,
    },
}
