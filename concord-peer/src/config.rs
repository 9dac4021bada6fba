use std::env;
use std::fs;
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const PORT_FILE: &str = "relay-config.json";
const DEFAULT_RELAY_HTTP_URL: &str = "http://127.0.0.1:8080";

/// Directory holding the identity, port, and known-peer files.
pub fn data_dir() -> PathBuf {
    match env::var("CONCORD_DATA_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("data"),
    }
}

/// Base URL of the rendezvous relay's HTTP API.
pub fn relay_http_url() -> String {
    match env::var("CONCORD_RELAY_URL") {
        Ok(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
        _ => DEFAULT_RELAY_HTTP_URL.to_string(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PortFile {
    port: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct PortSelection {
    pub port: u16,
    /// The persisted port was held by another process, almost always a
    /// second instance running against the same data directory.
    pub conflict: bool,
}

/// Resolve the overlay listen port. The persisted port is reused when still
/// free; a fresh OS-assigned port is picked (and persisted) otherwise.
pub fn resolve_port(data_dir: &Path) -> io::Result<PortSelection> {
    let path = data_dir.join(PORT_FILE);

    if let Some(port) = read_persisted_port(&path) {
        if port_is_free(port) {
            return Ok(PortSelection {
                port,
                conflict: false,
            });
        }
        log::warn!("Persisted port {} is in use, another instance is likely running", port);
        let port = pick_free_port()?;
        persist_port(&path, port);
        return Ok(PortSelection {
            port,
            conflict: true,
        });
    }

    let port = pick_free_port()?;
    persist_port(&path, port);
    Ok(PortSelection {
        port,
        conflict: false,
    })
}

/// Forget the persisted port after a bind failure so the next attempt (or
/// the next run) starts from a fresh OS-assigned one.
pub fn forget_port(data_dir: &Path) {
    let path = data_dir.join(PORT_FILE);
    if let Err(err) = fs::remove_file(&path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), err);
        }
    }
}

fn pick_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

fn read_persisted_port(path: &Path) -> Option<u16> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<PortFile>(&content) {
            Ok(file) if file.port != 0 => Some(file.port),
            Ok(_) => None,
            Err(err) => {
                log::warn!("Failed to parse {}: {}", path.display(), err);
                None
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            log::warn!("Failed to read {}: {}", path.display(), err);
            None
        }
    }
}

fn persist_port(path: &Path, port: u16) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            log::warn!("Failed to create {}: {}", parent.display(), err);
            return;
        }
    }
    match serde_json::to_string_pretty(&PortFile { port }) {
        Ok(payload) => {
            if let Err(err) = fs::write(path, payload) {
                log::warn!("Failed to persist port to {}: {}", path.display(), err);
            }
        }
        Err(err) => log::warn!("Failed to encode port file: {}", err),
    }
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_resolution_picks_and_persists_a_port() {
        let dir = tempfile::tempdir().expect("tempdir");
        let selection = resolve_port(dir.path()).expect("resolve");
        assert!(!selection.conflict);
        assert_ne!(selection.port, 0);

        let again = resolve_port(dir.path()).expect("resolve again");
        assert_eq!(again.port, selection.port);
        assert!(!again.conflict);
    }

    #[test]
    fn busy_persisted_port_reports_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let selection = resolve_port(dir.path()).expect("resolve");

        // Hold the persisted port open, as a second instance would.
        let _holder = TcpListener::bind(("0.0.0.0", selection.port)).expect("hold port");

        let second = resolve_port(dir.path()).expect("resolve under conflict");
        assert!(second.conflict);
        assert_ne!(second.port, selection.port);
    }

    #[test]
    fn corrupt_port_file_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(PORT_FILE), "{not json").expect("write corrupt");

        let selection = resolve_port(dir.path()).expect("resolve");
        assert!(!selection.conflict);
        assert_ne!(selection.port, 0);
    }

    #[test]
    fn forget_port_removes_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        resolve_port(dir.path()).expect("resolve");
        forget_port(dir.path());
        assert!(!dir.path().join(PORT_FILE).exists());
        // Idempotent on a missing file.
        forget_port(dir.path());
    }
}
