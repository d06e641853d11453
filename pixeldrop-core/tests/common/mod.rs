// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common Test Utilities
//!
//! Shared fixtures for the exchange tests and proptest strategies.

#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use pixeldrop_core::crypto::{AppSecret, PayloadCipher};
use pixeldrop_core::exchange::{
    ArtifactSealer, ConnectionCoordinator, ExchangeArtifact, JsonArtifactCodec, MockRadio,
    MockRadioMedium, PairedPeerRegistry, ResponderRoleAdapter,
};
use pixeldrop_core::ExchangeConfig;

/// A 4x4 drawing titled `title`.
pub fn small_artifact(title: &str) -> ExchangeArtifact {
    let pixels = (0..16).map(|i| i * 1000).collect();
    ExchangeArtifact::new(title, 4, pixels).unwrap()
}

/// Test configuration with short timeouts.
pub fn fast_config(device_id: &str) -> ExchangeConfig {
    ExchangeConfig::new(device_id)
        .with_scan_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_millis(500))
        .with_pairing_timeout(Duration::from_secs(5))
        .with_exchange_timeout(Duration::from_secs(2))
        .with_connect_retries(1, Duration::from_millis(10))
}

pub fn sealer(secret: &AppSecret) -> ArtifactSealer {
    ArtifactSealer::new(
        PayloadCipher::new(secret).unwrap(),
        Arc::new(JsonArtifactCodec),
    )
}

/// One simulated device running a single role.
pub struct Device {
    pub radio: Arc<MockRadio>,
    pub registry: PairedPeerRegistry,
}

impl Device {
    pub fn new(medium: &MockRadioMedium, address: &str) -> Self {
        Device {
            radio: Arc::new(medium.radio(address)),
            registry: PairedPeerRegistry::new(),
        }
    }

    pub fn coordinator(&self, config: ExchangeConfig) -> ConnectionCoordinator {
        let sealer = sealer(&config.secret);
        ConnectionCoordinator::new(config, self.radio.clone(), self.registry.clone(), sealer)
    }

    pub fn responder(&self, config: ExchangeConfig) -> ResponderRoleAdapter {
        let sealer = sealer(&config.secret);
        ResponderRoleAdapter::new(config, self.radio.clone(), self.registry.clone(), sealer)
    }
}
