// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Inspect Command
//!
//! Decrypts a captured artifact attribute with the configured secret.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use pixeldrop_core::crypto::checksum;
use pixeldrop_core::exchange::{ArtifactSealer, JsonArtifactCodec};
use pixeldrop_core::{ExchangeConfig, PayloadCipher};

pub fn run(config: &ExchangeConfig, blob: &str) -> Result<()> {
    let cipher = PayloadCipher::new(&config.secret)?;
    let sealer = ArtifactSealer::new(cipher, Arc::new(JsonArtifactCodec));

    let artifact = sealer
        .open(blob.trim().as_bytes())
        .context("blob does not decrypt under the configured secret")?;

    let pixels: Vec<u8> = artifact
        .pixels()
        .iter()
        .flat_map(|p| p.to_be_bytes())
        .collect();
    let report = json!({
        "id": artifact.id(),
        "title": artifact.title(),
        "author": artifact.author_nickname(),
        "grid_size": artifact.grid_size(),
        "pixel_checksum": checksum(&pixels),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
