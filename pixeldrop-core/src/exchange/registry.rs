// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Paired Peer Registry
//!
//! Session-scoped memory of peers already authenticated. Owned by the
//! orchestrator instance and shared with both roles; never persisted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// `peer_id -> session code` for peers paired during this run.
#[derive(Debug, Clone, Default)]
pub struct PairedPeerRegistry {
    peers: Arc<RwLock<HashMap<String, String>>>,
}

impl PairedPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successfully paired peer.
    pub fn insert(&self, peer_id: &str, code: &str) {
        self.peers
            .write()
            .insert(peer_id.to_string(), code.to_string());
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    /// Returns the code the peer was paired with.
    pub fn code_for(&self, peer_id: &str) -> Option<String> {
        self.peers.read().get(peer_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let registry = PairedPeerRegistry::new();
        let other = registry.clone();

        registry.insert("AA:BB", "123456");

        assert!(other.contains("AA:BB"));
        assert_eq!(other.code_for("AA:BB").as_deref(), Some("123456"));
    }

    #[test]
    fn test_separate_instances_are_isolated() {
        let a = PairedPeerRegistry::new();
        let b = PairedPeerRegistry::new();

        a.insert("AA:BB", "123456");

        assert!(!b.contains("AA:BB"));
        assert_eq!(b.code_for("AA:BB"), None);
    }
}
