// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exchange Error Types

use thiserror::Error;

use crate::crypto::CipherError;

/// Result type for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Errors that can occur during a proximity exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Radio is unavailable")]
    RadioUnavailable,

    #[error("Radio permission denied")]
    PermissionDenied,

    #[error("No peer discovered before scan timeout")]
    ScanTimeout,

    #[error("Connection to peer timed out")]
    ConnectTimeout,

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Pairing code has expired")]
    PairingExpired,

    #[error("Pairing signature is invalid")]
    PairingSignatureInvalid,

    #[error("Pairing was rejected")]
    PairingRejected,

    #[error("Pairing confirmation timed out")]
    PairingTimeout,

    #[error("Artifact decryption failed")]
    DecryptionFailed,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Peer did not send its artifact in time")]
    ExchangeTimeout,

    #[error("Encoded artifact exceeds the attribute packet limit ({0} bytes)")]
    ArtifactTooLarge(usize),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ExchangeError {
    /// Whether a connect attempt that failed with this error may be retried.
    ///
    /// Authentication and decryption failures are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::ConnectTimeout | ExchangeError::Disconnected)
    }

    /// Whether this error ends a pairing attempt.
    pub fn is_pairing_failure(&self) -> bool {
        matches!(
            self,
            ExchangeError::PairingExpired
                | ExchangeError::PairingSignatureInvalid
                | ExchangeError::PairingRejected
                | ExchangeError::PairingTimeout
        )
    }
}

impl From<CipherError> for ExchangeError {
    fn from(_: CipherError) -> Self {
        ExchangeError::DecryptionFailed
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::MalformedMessage(err.to_string())
    }
}
