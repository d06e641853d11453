// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exchange Artifact
//!
//! The drawing record swapped between peers, its serialization boundary,
//! and the sealing step that turns it into an attribute-sized blob.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ExchangeError, ExchangeResult};
use super::schema::MAX_ATTRIBUTE_VALUE_LEN;
use super::ExchangeRole;
use crate::crypto::PayloadCipher;

/// Largest supported drawing grid edge.
pub const MAX_GRID_SIZE: u32 = 32;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 40;

/// A small pixel drawing offered for exchange.
///
/// Immutable once constructed; all fields are validated up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeArtifact {
    id: String,
    pixels: Vec<u32>,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_nickname: Option<String>,
    grid_size: u32,
}

impl ExchangeArtifact {
    /// Creates a new artifact with a fresh id.
    pub fn new(title: &str, grid_size: u32, pixels: Vec<u32>) -> ExchangeResult<Self> {
        Self::from_parts(
            uuid::Uuid::new_v4().to_string(),
            title.to_string(),
            grid_size,
            pixels,
            None,
        )
    }

    /// Creates an artifact from existing parts, validating them.
    pub fn from_parts(
        id: String,
        title: String,
        grid_size: u32,
        pixels: Vec<u32>,
        author_nickname: Option<String>,
    ) -> ExchangeResult<Self> {
        let artifact = ExchangeArtifact {
            id,
            pixels,
            title,
            author_nickname,
            grid_size,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Returns a copy carrying the author's nickname.
    pub fn with_author(mut self, nickname: &str) -> Self {
        self.author_nickname = Some(nickname.to_string());
        self
    }

    fn validate(&self) -> ExchangeResult<()> {
        if self.id.is_empty() {
            return Err(ExchangeError::InvalidArtifact("empty id".into()));
        }
        if self.title.trim().is_empty() {
            return Err(ExchangeError::InvalidArtifact("empty title".into()));
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(ExchangeError::InvalidArtifact("title too long".into()));
        }
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(ExchangeError::InvalidArtifact(format!(
                "grid size {} out of range",
                self.grid_size
            )));
        }
        let expected = (self.grid_size * self.grid_size) as usize;
        if self.pixels.len() != expected {
            return Err(ExchangeError::InvalidArtifact(format!(
                "expected {} pixels, got {}",
                expected,
                self.pixels.len()
            )));
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author_nickname(&self) -> Option<&str> {
        self.author_nickname.as_deref()
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }
}

/// Serialization boundary owned by the domain-model layer.
pub trait ArtifactCodec: Send + Sync {
    /// Serializes an artifact to bytes.
    fn encode(&self, artifact: &ExchangeArtifact) -> ExchangeResult<Vec<u8>>;

    /// Parses and validates an artifact.
    fn decode(&self, bytes: &[u8]) -> ExchangeResult<ExchangeArtifact>;
}

/// Default codec: the JSON record `{id, pixels, title, authorNickname?, gridSize}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArtifactCodec;

impl ArtifactCodec for JsonArtifactCodec {
    fn encode(&self, artifact: &ExchangeArtifact) -> ExchangeResult<Vec<u8>> {
        Ok(serde_json::to_vec(artifact)?)
    }

    fn decode(&self, bytes: &[u8]) -> ExchangeResult<ExchangeArtifact> {
        let artifact: ExchangeArtifact = serde_json::from_slice(bytes)?;
        artifact.validate()?;
        Ok(artifact)
    }
}

/// Where a received artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactSource {
    /// Received over a paired proximity radio exchange.
    RadioExchange,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSource::RadioExchange => "radio-exchange",
        }
    }
}

/// An artifact tagged with receipt metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedArtifact {
    /// Radio address of the sender.
    pub peer_id: String,
    /// The decrypted artifact.
    pub artifact: ExchangeArtifact,
    /// When the artifact was decrypted locally.
    pub received_at: DateTime<Utc>,
    /// Always `RadioExchange` for this subsystem.
    pub source: ArtifactSource,
    /// Which local role completed the exchange.
    pub via: ExchangeRole,
}

impl ReceivedArtifact {
    pub fn new(peer_id: &str, artifact: ExchangeArtifact, via: ExchangeRole) -> Self {
        ReceivedArtifact {
            peer_id: peer_id.to_string(),
            artifact,
            received_at: Utc::now(),
            source: ArtifactSource::RadioExchange,
            via,
        }
    }
}

/// Seals artifacts into encrypted attribute values and opens them again.
#[derive(Clone)]
pub struct ArtifactSealer {
    cipher: PayloadCipher,
    codec: Arc<dyn ArtifactCodec>,
}

impl std::fmt::Debug for ArtifactSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSealer").finish_non_exhaustive()
    }
}

impl ArtifactSealer {
    pub fn new(cipher: PayloadCipher, codec: Arc<dyn ArtifactCodec>) -> Self {
        ArtifactSealer { cipher, codec }
    }

    /// Encodes and encrypts an artifact. Every call uses a fresh nonce.
    pub fn seal(&self, artifact: &ExchangeArtifact) -> ExchangeResult<Vec<u8>> {
        let plaintext = self.codec.encode(artifact)?;
        let blob = self
            .cipher
            .encrypt(&plaintext)
            .map_err(|e| ExchangeError::InvalidArtifact(e.to_string()))?;

        if blob.len() > MAX_ATTRIBUTE_VALUE_LEN {
            return Err(ExchangeError::ArtifactTooLarge(blob.len()));
        }
        Ok(blob.into_bytes())
    }

    /// Decrypts and decodes an attribute value.
    ///
    /// Any cipher error becomes `DecryptionFailed`; no partial artifact is
    /// ever returned.
    pub fn open(&self, value: &[u8]) -> ExchangeResult<ExchangeArtifact> {
        let blob = std::str::from_utf8(value).map_err(|_| ExchangeError::DecryptionFailed)?;
        let plaintext = self.cipher.decrypt(blob)?;
        self.codec.decode(&plaintext)
    }
}
