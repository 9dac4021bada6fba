use std::env;

const DEFAULT_WS_PORT: u16 = 9090;
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_HOSTNAME: &str = "relay.example.com";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub ws_port: u16,
    pub http_port: u16,
    pub hostname: String,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            ws_port: env_u16("WS_PORT", DEFAULT_WS_PORT),
            http_port: env_u16("HTTP_PORT", DEFAULT_HTTP_PORT),
            hostname: env::var("RELAY_HOSTNAME").unwrap_or_else(|_| DEFAULT_HOSTNAME.to_string()),
        }
    }

    /// The externally reachable address peers should dial and listen through.
    pub fn external_addr(&self, relay_peer_id: &str) -> String {
        format!(
            "/dns4/{}/tcp/{}/ws/p2p/{}",
            self.hostname, self.ws_port, relay_peer_id
        )
    }
}

fn env_u16(key: &str, default_value: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_addr_embeds_hostname_port_and_peer() {
        let config = RelayConfig {
            ws_port: 9191,
            http_port: 8080,
            hostname: "relay.test".to_string(),
        };
        assert_eq!(
            config.external_addr("12D3KooWRelay"),
            "/dns4/relay.test/tcp/9191/ws/p2p/12D3KooWRelay"
        );
    }
}
