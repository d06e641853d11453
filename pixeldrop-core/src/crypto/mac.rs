// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pairing Message Signatures
//!
//! `HMAC-SHA256(app_secret, code || ":" || flag)` truncated to 8 bytes and
//! hex encoded. The secret is static, so a signature only proves that the
//! sender runs a genuine build and saw the same code. Replay resistance
//! comes solely from the code's validity window.

use ring::hmac;
use subtle::ConstantTimeEq;

use super::AppSecret;

/// Bytes of the HMAC tag kept on the wire.
const SIGNATURE_BYTES: usize = 8;

/// Length of the hex-encoded signature.
pub const SIGNATURE_HEX_LEN: usize = SIGNATURE_BYTES * 2;

/// What a pairing signature vouches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedFlag {
    /// A pairing request carrying a fresh code.
    Request,
    /// A confirmation with the operator's verdict.
    Confirmed(bool),
}

impl SignedFlag {
    fn as_str(self) -> &'static str {
        match self {
            SignedFlag::Request => "request",
            SignedFlag::Confirmed(true) => "true",
            SignedFlag::Confirmed(false) => "false",
        }
    }
}

/// Computes the signature for a pairing message.
pub fn pairing_signature(secret: &AppSecret, code: &str, flag: SignedFlag) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());

    let mut message = Vec::with_capacity(code.len() + 8);
    message.extend_from_slice(code.as_bytes());
    message.push(b':');
    message.extend_from_slice(flag.as_str().as_bytes());

    let tag = hmac::sign(&key, &message);
    hex::encode(&tag.as_ref()[..SIGNATURE_BYTES])
}

/// Verifies a pairing signature in constant time.
pub fn verify_pairing_signature(
    secret: &AppSecret,
    code: &str,
    flag: SignedFlag,
    signature: &str,
) -> bool {
    if signature.len() != SIGNATURE_HEX_LEN {
        return false;
    }
    let expected = pairing_signature(secret, code, flag);
    let provided = signature.to_ascii_lowercase();
    bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_hex16() {
        let sig = pairing_signature(&AppSecret::default(), "123456", SignedFlag::Request);
        assert_eq!(sig.len(), SIGNATURE_HEX_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_flag_changes_signature() {
        let secret = AppSecret::default();
        let yes = pairing_signature(&secret, "123456", SignedFlag::Confirmed(true));
        let no = pairing_signature(&secret, "123456", SignedFlag::Confirmed(false));
        let req = pairing_signature(&secret, "123456", SignedFlag::Request);

        assert_ne!(yes, no);
        assert_ne!(yes, req);
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let ours = AppSecret::from_passphrase("ours");
        let theirs = AppSecret::from_passphrase("theirs");
        let sig = pairing_signature(&theirs, "482193", SignedFlag::Confirmed(true));

        assert!(!verify_pairing_signature(
            &ours,
            "482193",
            SignedFlag::Confirmed(true),
            &sig
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let secret = AppSecret::default();
        let sig = pairing_signature(&secret, "482193", SignedFlag::Request);
        assert!(!verify_pairing_signature(
            &secret,
            "482193",
            SignedFlag::Request,
            &sig[..10]
        ));
    }
}
