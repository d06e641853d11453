// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pre-shared Application Secret
//!
//! Every Pixeldrop build ships the same secret. It keys both the payload
//! cipher and the pairing MAC. It is not a per-user credential: anyone who
//! extracts it from a binary can forge pairing messages, so it only raises
//! the bar against passive observers and accidental connections.

use zeroize::Zeroize;

/// Built-in secret used when no override is configured.
const DEFAULT_APP_SECRET: &[u8] = b"pixeldrop/app-secret/2026-v1";

/// Shared application secret.
#[derive(Clone)]
pub struct AppSecret {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Drop for AppSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Default for AppSecret {
    fn default() -> Self {
        AppSecret::from_bytes(DEFAULT_APP_SECRET)
    }
}

impl AppSecret {
    /// Creates a secret from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        AppSecret {
            bytes: bytes.to_vec(),
        }
    }

    /// Creates a secret from a UTF-8 passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::from_bytes(passphrase.as_bytes())
    }

    /// Returns a reference to the secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
