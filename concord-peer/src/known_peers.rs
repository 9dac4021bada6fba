use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

const KNOWN_PEERS_FILE: &str = "known-peers.json";
const MAX_KNOWN_PEERS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownPeer {
    pub address: String,
    pub last_seen_ms: i64,
}

/// Addresses that worked before, kept most-recent-first and redialed once on
/// the next startup so LAN neighbours and circuit routes come back without
/// user action.
pub struct KnownPeers {
    path: PathBuf,
    entries: Vec<KnownPeer>,
}

impl KnownPeers {
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(KNOWN_PEERS_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<KnownPeer>>(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    log::warn!("Failed to parse {}: {}", path.display(), err);
                    Vec::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                log::warn!("Failed to read {}: {}", path.display(), err);
                Vec::new()
            }
        };
        Self { path, entries }
    }

    pub fn add(&mut self, address: &str) {
        self.add_at(address, Utc::now().timestamp_millis());
    }

    fn add_at(&mut self, address: &str, now_ms: i64) {
        let address = normalize(address);
        if address.is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => entry.last_seen_ms = now_ms,
            None => self.entries.push(KnownPeer {
                address,
                last_seen_ms: now_ms,
            }),
        }

        self.entries.sort_by(|a, b| b.last_seen_ms.cmp(&a.last_seen_ms));
        self.entries.truncate(MAX_KNOWN_PEERS);
        self.persist();
    }

    /// Surviving addresses, most recent first. Entries that do not look like
    /// overlay addresses are stale state from earlier versions and skipped.
    pub fn addresses(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.address.starts_with('/'))
            .map(|e| e.address.clone())
            .collect()
    }

    fn persist(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                log::warn!("Failed to create {}: {}", parent.display(), err);
                return;
            }
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(payload) => {
                if let Err(err) = fs::write(&self.path, payload) {
                    log::warn!("Failed to persist known peers: {}", err);
                }
            }
            Err(err) => log::warn!("Failed to encode known peers: {}", err),
        }
    }
}

fn normalize(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_normalizes_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut peers = KnownPeers::load(dir.path());
        peers.add("  /ip4/10.0.0.2/tcp/9100/ws/p2p/12D3KooWPeerB/ ");

        let reloaded = KnownPeers::load(dir.path());
        assert_eq!(
            reloaded.addresses(),
            ["/ip4/10.0.0.2/tcp/9100/ws/p2p/12D3KooWPeerB"]
        );
    }

    #[test]
    fn readd_updates_recency_instead_of_duplicating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut peers = KnownPeers::load(dir.path());
        peers.add_at("/ip4/10.0.0.2/tcp/9100/ws", 100);
        peers.add_at("/ip4/10.0.0.3/tcp/9100/ws", 200);
        peers.add_at("/ip4/10.0.0.2/tcp/9100/ws", 300);

        assert_eq!(
            peers.addresses(),
            ["/ip4/10.0.0.2/tcp/9100/ws", "/ip4/10.0.0.3/tcp/9100/ws"]
        );
    }

    #[test]
    fn store_is_capped_to_most_recent_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut peers = KnownPeers::load(dir.path());
        for i in 0..(MAX_KNOWN_PEERS + 10) {
            peers.add_at(&format!("/ip4/10.0.0.{i}/tcp/9100/ws"), i as i64);
        }

        let addresses = peers.addresses();
        assert_eq!(addresses.len(), MAX_KNOWN_PEERS);
        assert_eq!(addresses[0], format!("/ip4/10.0.0.{}/tcp/9100/ws", MAX_KNOWN_PEERS + 9));
        assert!(!addresses.contains(&"/ip4/10.0.0.9/tcp/9100/ws".to_string()));
    }

    #[test]
    fn malformed_addresses_are_rejected_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(KNOWN_PEERS_FILE),
            r#"[{"address":"/ip4/10.0.0.2/tcp/9100/ws","lastSeenMs":1},
                {"address":"not-an-address","lastSeenMs":2}]"#,
        )
        .expect("seed file");

        let peers = KnownPeers::load(dir.path());
        assert_eq!(peers.addresses(), ["/ip4/10.0.0.2/tcp/9100/ws"]);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(KNOWN_PEERS_FILE), "][").expect("seed corrupt");
        assert!(KnownPeers::load(dir.path()).addresses().is_empty());
    }
}
