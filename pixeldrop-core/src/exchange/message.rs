// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pairing Wire Messages
//!
//! JSON objects written to the pairing attribute:
//!
//! ```text
//! {"type":"pairing_request","code":"482193","method":"numeric_comparison",
//!  "device_id":"…","expires_at":"2026-10-18T09:00:00Z","signature":"<hex16>"}
//! {"type":"pairing_confirmation","confirmed":true,"code":"482193","signature":"<hex16>"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ExchangeError, ExchangeResult};
use super::schema::PAIRING_CODE_LENGTH;
use crate::crypto::SIGNATURE_HEX_LEN;

/// Interactive verification method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMethod {
    /// Both screens show the code; the operator confirms they match.
    NumericComparison,
    /// The responder shows the code; the operator types it on the initiator.
    PasskeyEntry,
}

impl std::fmt::Display for PairingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingMethod::NumericComparison => write!(f, "numeric_comparison"),
            PairingMethod::PasskeyEntry => write!(f, "passkey_entry"),
        }
    }
}

/// Signed request opening a pairing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    pub code: String,
    pub method: PairingMethod,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

/// Signed verdict of one operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingConfirmation {
    pub confirmed: bool,
    pub code: String,
    pub signature: String,
}

/// Any message carried on the pairing attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairingMessage {
    PairingRequest(PairingRequest),
    PairingConfirmation(PairingConfirmation),
}

impl PairingMessage {
    /// Serializes to the JSON wire form.
    pub fn to_bytes(&self) -> ExchangeResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses and shape-checks a wire message.
    ///
    /// Signatures are not verified here; that needs session context.
    pub fn from_bytes(bytes: &[u8]) -> ExchangeResult<Self> {
        let message: PairingMessage = serde_json::from_slice(bytes)?;
        let (code, signature) = match &message {
            PairingMessage::PairingRequest(r) => (&r.code, &r.signature),
            PairingMessage::PairingConfirmation(c) => (&c.code, &c.signature),
        };
        if !is_valid_code(code) {
            return Err(ExchangeError::MalformedMessage(
                "code must be six digits".into(),
            ));
        }
        if signature.len() != SIGNATURE_HEX_LEN || !signature.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ExchangeError::MalformedMessage(
                "signature must be 16 hex characters".into(),
            ));
        }
        Ok(message)
    }
}

/// Checks the fixed-length numeric code format.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == PAIRING_CODE_LENGTH && code.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let msg = PairingMessage::PairingRequest(PairingRequest {
            code: "482193".into(),
            method: PairingMethod::PasskeyEntry,
            device_id: "dev-1".into(),
            expires_at: "2026-10-18T09:00:00Z".parse().unwrap(),
            signature: "00112233445566aa".into(),
        });
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(json["type"], "pairing_request");
        assert_eq!(json["method"], "passkey_entry");
        assert_eq!(json["device_id"], "dev-1");
        assert_eq!(json["expires_at"], "2026-10-18T09:00:00Z");
    }

    #[test]
    fn test_confirmation_parses_from_wire() {
        let raw = br#"{"type":"pairing_confirmation","confirmed":true,"code":"000001","signature":"0123456789abcdef"}"#;
        let msg = PairingMessage::from_bytes(raw).unwrap();

        assert_eq!(
            msg,
            PairingMessage::PairingConfirmation(PairingConfirmation {
                confirmed: true,
                code: "000001".into(),
                signature: "0123456789abcdef".into(),
            })
        );
    }

    #[test]
    fn test_rejects_bad_code_and_signature() {
        let short_code = br#"{"type":"pairing_confirmation","confirmed":true,"code":"12345","signature":"0123456789abcdef"}"#;
        let bad_sig = br#"{"type":"pairing_confirmation","confirmed":true,"code":"123456","signature":"xyz"}"#;
        let unknown = br#"{"type":"pairing_hello"}"#;

        assert!(matches!(
            PairingMessage::from_bytes(short_code),
            Err(ExchangeError::MalformedMessage(_))
        ));
        assert!(PairingMessage::from_bytes(bad_sig).is_err());
        assert!(PairingMessage::from_bytes(unknown).is_err());
    }
}
