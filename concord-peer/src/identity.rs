use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use libp2p::identity::Keypair;
use serde::{Deserialize, Serialize};

const IDENTITY_FILE: &str = "node-identity.json";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    private_key: String,
    created_at: String,
}

/// Load the long-term signing keypair, creating and persisting one on first
/// run. A port conflict means another instance owns this data directory, so
/// the returned keypair is ephemeral and never written to disk.
pub fn load_or_create(data_dir: &Path, port_conflict: bool) -> (Keypair, bool) {
    if port_conflict {
        log::warn!("Port conflict detected; using an ephemeral identity");
        return (Keypair::generate_ed25519(), true);
    }

    let path = data_dir.join(IDENTITY_FILE);
    match load(&path) {
        Ok(keypair) => {
            log::info!("Loaded persisted identity from {}", path.display());
            (keypair, false)
        }
        Err(err) => {
            if path.exists() {
                log::warn!("Discarding unreadable identity file ({}); generating a new identity", err);
            }
            let keypair = Keypair::generate_ed25519();
            if let Err(err) = persist(&path, &keypair) {
                log::warn!("Failed to persist identity to {}: {}", path.display(), err);
            }
            (keypair, false)
        }
    }
}

fn load(path: &Path) -> Result<Keypair, Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let file: IdentityFile = serde_json::from_str(&content)?;
    let bytes = BASE64.decode(file.private_key.as_bytes())?;
    let keypair = Keypair::from_protobuf_encoding(&bytes)
        .map_err(|e| format!("Failed to decode identity key: {}", e))?;
    Ok(keypair)
}

/// Write-temp-then-rename so a crash mid-write never leaves a truncated
/// identity file behind.
fn persist(path: &Path, keypair: &Keypair) -> Result<(), Box<dyn Error>> {
    let encoded = keypair
        .to_protobuf_encoding()
        .map_err(|e| format!("Failed to encode identity key: {}", e))?;
    let file = IdentityFile {
        private_key: BASE64.encode(encoded),
        created_at: Utc::now().to_rfc3339(),
    };
    let payload = serde_json::to_string_pretty(&file)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Box::new(io::Error::new(err.kind(), err)));
    }
    Ok(())
}
