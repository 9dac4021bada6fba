use serde::Deserialize;

/// Commands the controller writes to the node's stdin, one JSON object per
/// line, discriminated by the `cmd` field. Unknown or malformed lines are
/// reported back as `log` events and dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ControllerCommand {
    /// Deliver `data` on `channelId`; point-to-point when `targetPeerId` is
    /// present, otherwise broadcast to every known chat peer.
    Send {
        channel_id: String,
        data: String,
        #[serde(default)]
        target_peer_id: Option<String>,
    },
    /// Connect to a peer by invite code or full overlay address.
    Dial { address: String },
    /// Report current identity, addresses, and connected peers.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targeted_send() {
        let cmd: ControllerCommand = serde_json::from_str(
            r#"{"cmd":"send","channelId":"general","data":"hi","targetPeerId":"12D3KooWPeerB"}"#,
        )
        .expect("send parses");
        match cmd {
            ControllerCommand::Send {
                channel_id,
                data,
                target_peer_id,
            } => {
                assert_eq!(channel_id, "general");
                assert_eq!(data, "hi");
                assert_eq!(target_peer_id.as_deref(), Some("12D3KooWPeerB"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn target_peer_is_optional() {
        let cmd: ControllerCommand =
            serde_json::from_str(r#"{"cmd":"send","channelId":"general","data":"hi"}"#)
                .expect("broadcast send parses");
        assert!(matches!(
            cmd,
            ControllerCommand::Send {
                target_peer_id: None,
                ..
            }
        ));
    }

    #[test]
    fn parses_dial_and_status() {
        let dial: ControllerCommand =
            serde_json::from_str(r#"{"cmd":"dial","address":"ABCD-WXYZ"}"#).expect("dial parses");
        assert!(matches!(dial, ControllerCommand::Dial { .. }));

        let status: ControllerCommand =
            serde_json::from_str(r#"{"cmd":"status"}"#).expect("status parses");
        assert!(matches!(status, ControllerCommand::Status));
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(serde_json::from_str::<ControllerCommand>(r#"{"cmd":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ControllerCommand>("not json").is_err());
    }
}
