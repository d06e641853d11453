// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pixeldrop Core Library
//!
//! Proximity exchange of small pixel drawings between two nearby devices:
//! dual-role discovery, human-verified pairing, and authenticated
//! encryption of the exchanged payload.
//! All cryptographic operations use the audited `ring` crate.

pub mod config;
pub mod crypto;
pub mod exchange;
pub mod notify;

pub use config::{ConfigError, ExchangeConfig, ExchangeSettings, StaticSettings};
pub use crypto::{checksum, verify_checksum, AppSecret, CipherError, PayloadCipher};
pub use exchange::{
    ConnectionCoordinator, ConnectionState, DiscoveredPeer, DualRoleOrchestrator,
    ExchangeArtifact, ExchangeError, ExchangeResult, ExchangeRole, MockRadio, MockRadioMedium,
    PairedPeerRegistry, PairingMethod, PairingPrompt, PairingProtocol, PairingSession,
    PairingState, ReceivedArtifact, ResponderRoleAdapter,
};
pub use notify::{NoopNotificationSink, NotificationSink, RecordingNotificationSink};
