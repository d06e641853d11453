// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Payload Cipher (AES-256-GCM)
//!
//! Encrypts artifact bytes before they touch the radio link.
//!
//! Blob format: `base64(nonce (12 bytes) || ciphertext || tag (16 bytes))`
//!
//! The key is derived from the application secret with HKDF-SHA256, so the
//! raw secret is never used directly as an AEAD key. A fresh random nonce
//! is drawn for every call to [`PayloadCipher::encrypt`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest::{digest, SHA256};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

use super::AppSecret;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;
/// Authentication tag size.
pub const TAG_SIZE: usize = 16;
/// Number of digest bytes kept for a checksum.
const CHECKSUM_BYTES: usize = 8;

const PAYLOAD_KDF_SALT: &[u8] = b"pixeldrop/payload-salt";
const PAYLOAD_KDF_INFO: &[u8] = b"pixeldrop/payload/v1";

/// Payload cipher error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: data may be corrupted or wrong key")]
    DecryptionFailed,
    #[error("Ciphertext too short")]
    CiphertextTooShort,
    #[error("Payload is not valid base64")]
    InvalidEncoding,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

/// Symmetric cipher for exchange artifacts.
#[derive(Clone)]
pub struct PayloadCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for PayloadCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl PayloadCipher {
    /// Derives the payload key from the shared application secret.
    pub fn new(secret: &AppSecret) -> Result<Self, CipherError> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, PAYLOAD_KDF_SALT);
        let prk = salt.extract(secret.as_bytes());
        let okm = prk
            .expand(&[PAYLOAD_KDF_INFO], hkdf::HKDF_SHA256)
            .map_err(|_| CipherError::KeyDerivationFailed)?;

        let mut key = [0u8; 32];
        okm.fill(&mut key)
            .map_err(|_| CipherError::KeyDerivationFailed)?;

        Ok(PayloadCipher { key })
    }

    fn aead_key(&self) -> Result<LessSafeKey, CipherError> {
        let unbound =
            UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| CipherError::EncryptionFailed)?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypts plaintext into a base64 blob.
    ///
    /// Output: `base64(nonce || ciphertext || tag)`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let rng = SystemRandom::new();

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let sealing_key = self.aead_key()?;
        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut output = Vec::with_capacity(NONCE_SIZE + in_out.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&in_out);

        Ok(BASE64.encode(output))
    }

    /// Decrypts a base64 blob produced by [`PayloadCipher::encrypt`].
    ///
    /// Fails closed: no plaintext is returned unless the tag verifies.
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>, CipherError> {
        let data = BASE64
            .decode(blob.trim())
            .map_err(|_| CipherError::InvalidEncoding)?;
        self.decrypt_raw(&data)
    }

    /// Decrypts raw `nonce || ciphertext || tag` bytes.
    pub fn decrypt_raw(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::CiphertextTooShort);
        }

        let nonce_bytes: [u8; NONCE_SIZE] = data[..NONCE_SIZE]
            .try_into()
            .map_err(|_| CipherError::DecryptionFailed)?;
        let opening_key = self.aead_key().map_err(|_| CipherError::DecryptionFailed)?;

        let mut buffer = data[NONCE_SIZE..].to_vec();
        let plaintext = opening_key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut buffer,
            )
            .map_err(|_| CipherError::DecryptionFailed)?;

        Ok(plaintext.to_vec())
    }
}

/// Short integrity tag: first 8 bytes of SHA-256, hex encoded.
///
/// Detects accidental corruption only. It is keyless and must not be
/// treated as authentication.
pub fn checksum(data: &[u8]) -> String {
    let hash = digest(&SHA256, data);
    hex::encode(&hash.as_ref()[..CHECKSUM_BYTES])
}

/// Checks `data` against a checksum produced by [`checksum`].
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    let actual = checksum(data);
    let expected = expected.to_ascii_lowercase();
    actual.len() == expected.len() && bool::from(actual.as_bytes().ct_eq(expected.as_bytes()))
}
