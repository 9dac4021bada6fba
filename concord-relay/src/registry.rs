use std::collections::HashMap;

use rand::Rng;

/// A registered invite code stays alive for 24 hours after the last touch.
pub const CODE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Characters allowed in generated codes. `O`, `0`, `I` and `1` are excluded
/// because they are easy to misread when codes are shared out loud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const CODE_GROUP_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct InviteEntry {
    pub peer_id: String,
    pub last_seen_ms: i64,
}

/// Maps short human-shareable codes to peer ids and back.
///
/// `code_to_entry` keys and `peer_to_code` values stay a consistent bijection
/// across every mutation: a live code resolves to exactly one peer, and a peer
/// holds at most one live code.
#[derive(Debug, Default)]
pub struct InviteRegistry {
    code_to_entry: HashMap<String, InviteEntry>,
    peer_to_code: HashMap<String, String>,
}

impl InviteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and hand back its code. Re-registration within the TTL
    /// returns the existing code and refreshes its last-seen time.
    pub fn register(&mut self, peer_id: &str, now_ms: i64) -> String {
        if let Some(code) = self.peer_to_code.get(peer_id) {
            if let Some(entry) = self.code_to_entry.get_mut(code) {
                entry.last_seen_ms = now_ms;
                return code.clone();
            }
        }

        let code = loop {
            let candidate = generate_code();
            if !self.code_to_entry.contains_key(&candidate) {
                break candidate;
            }
        };

        self.code_to_entry.insert(
            code.clone(),
            InviteEntry {
                peer_id: peer_id.to_string(),
                last_seen_ms: now_ms,
            },
        );
        self.peer_to_code.insert(peer_id.to_string(), code.clone());
        code
    }

    /// Case-insensitive lookup. A hit refreshes the entry's last-seen time,
    /// so any traffic against a code extends its life.
    pub fn lookup(&mut self, code: &str, now_ms: i64) -> Option<InviteEntry> {
        let code = code.trim().to_uppercase();
        let entry = self.code_to_entry.get_mut(&code)?;
        entry.last_seen_ms = now_ms;
        Some(entry.clone())
    }

    /// Drop every entry not touched within [`CODE_TTL_MS`], from both maps.
    pub fn sweep(&mut self, now_ms: i64) {
        let expired: Vec<String> = self
            .code_to_entry
            .iter()
            .filter(|(_, entry)| now_ms - entry.last_seen_ms > CODE_TTL_MS)
            .map(|(code, _)| code.clone())
            .collect();

        for code in expired {
            if let Some(entry) = self.code_to_entry.remove(&code) {
                self.peer_to_code.remove(&entry.peer_id);
                log::debug!("Invite code {} for {} expired", code, entry.peer_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.code_to_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_to_entry.is_empty()
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut group = |out: &mut String| {
        for _ in 0..CODE_GROUP_LEN {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            out.push(CODE_ALPHABET[idx] as char);
        }
    };

    let mut code = String::with_capacity(CODE_GROUP_LEN * 2 + 1);
    group(&mut code);
    code.push('-');
    group(&mut code);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_resolves_peer() {
        let mut registry = InviteRegistry::new();
        let code = registry.register("12D3KooWPeerA", 1_000);
        let entry = registry.lookup(&code, 2_000).expect("code resolves");
        assert_eq!(entry.peer_id, "12D3KooWPeerA");
    }

    #[test]
    fn reregistration_returns_same_code() {
        let mut registry = InviteRegistry::new();
        let first = registry.register("12D3KooWPeerA", 1_000);
        let second = registry.register("12D3KooWPeerA", 5_000);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_peers_get_distinct_codes() {
        let mut registry = InviteRegistry::new();
        let a = registry.register("12D3KooWPeerA", 0);
        let b = registry.register("12D3KooWPeerB", 0);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = InviteRegistry::new();
        let code = registry.register("12D3KooWPeerA", 0);
        let entry = registry
            .lookup(&code.to_lowercase(), 1)
            .expect("lowercase lookup resolves");
        assert_eq!(entry.peer_id, "12D3KooWPeerA");
    }

    #[test]
    fn sweep_removes_expired_entries_from_both_maps() {
        let mut registry = InviteRegistry::new();
        let code = registry.register("12D3KooWPeerA", 0);

        registry.sweep(CODE_TTL_MS);
        assert!(registry.lookup(&code, CODE_TTL_MS).is_some());

        registry.sweep(2 * CODE_TTL_MS + 1);
        assert!(registry.lookup(&code, 2 * CODE_TTL_MS + 1).is_none());
        assert!(registry.is_empty());

        // The peer map forgot the code too, so a new registration works.
        let fresh = registry.register("12D3KooWPeerA", 3 * CODE_TTL_MS);
        assert!(registry.lookup(&fresh, 3 * CODE_TTL_MS).is_some());
    }

    #[test]
    fn lookup_refreshes_ttl() {
        let mut registry = InviteRegistry::new();
        let code = registry.register("12D3KooWPeerA", 0);

        // Touched at half TTL by a lookup, the entry survives a sweep that
        // would otherwise have reaped it.
        registry.lookup(&code, CODE_TTL_MS / 2).unwrap();
        registry.sweep(CODE_TTL_MS + 1);
        assert!(registry.lookup(&code, CODE_TTL_MS + 1).is_some());
    }

    #[test]
    fn generated_codes_use_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 9);
            let (head, tail) = code.split_at(4);
            assert_eq!(&tail[..1], "-");
            for c in head.chars().chain(tail[1..].chars()) {
                assert!(CODE_ALPHABET.contains(&(c as u8)), "unexpected char {c}");
            }
        }
    }
}
