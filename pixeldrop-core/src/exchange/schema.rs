// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Attribute Schema
//!
//! Fixed identifiers shared by every Pixeldrop build. Both peers must agree
//! on these values; nothing here is negotiated over the air.

use std::time::Duration;

use uuid::Uuid;

/// Exchange service identifier carried in advertisements.
pub const EXCHANGE_SERVICE_UUID: Uuid = Uuid::from_u128(0x7d2e0001_4c1b_4e8a_9f3d_5a6b7c8d9e0f);

/// Central writes its encrypted artifact here.
pub const ARTIFACT_WRITE_UUID: Uuid = Uuid::from_u128(0x7d2e0002_4c1b_4e8a_9f3d_5a6b7c8d9e0f);

/// Peripheral serves (read) and pushes (notify) its encrypted artifact here.
pub const ARTIFACT_READ_UUID: Uuid = Uuid::from_u128(0x7d2e0003_4c1b_4e8a_9f3d_5a6b7c8d9e0f);

/// Pairing requests and confirmations, written by the central and
/// notified by the peripheral.
pub const PAIRING_UUID: Uuid = Uuid::from_u128(0x7d2e0004_4c1b_4e8a_9f3d_5a6b7c8d9e0f);

/// Attributes an initiator must resolve before exchanging.
pub const REQUIRED_ATTRIBUTES: [Uuid; 2] = [ARTIFACT_WRITE_UUID, ARTIFACT_READ_UUID];

/// Number of digits in a pairing code.
pub const PAIRING_CODE_LENGTH: usize = 6;

/// How long a pairing code stays valid.
pub const PAIRING_CODE_VALIDITY: Duration = Duration::from_secs(60);

/// Largest attribute value the radio layer accepts.
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 512;

/// Prefix of every advertised local name.
pub const ADVERTISED_NAME_PREFIX: &str = "PD_";

/// Maximum number of display-name characters after the prefix.
pub const MAX_DISPLAY_NAME_CHARS: usize = 5;

/// Builds the advertised local name: prefix plus at most five characters.
pub fn encode_advertised_name(display_name: &str) -> String {
    let short: String = display_name
        .trim()
        .chars()
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect();
    format!("{ADVERTISED_NAME_PREFIX}{short}")
}

/// Extracts the display name from an advertised local name.
///
/// Returns `None` for names that were not produced by Pixeldrop.
pub fn decode_advertised_name(local_name: &str) -> Option<String> {
    let short = local_name.strip_prefix(ADVERTISED_NAME_PREFIX)?;
    if short.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return None;
    }
    Some(short.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_ids_are_distinct() {
        let ids = [
            EXCHANGE_SERVICE_UUID,
            ARTIFACT_WRITE_UUID,
            ARTIFACT_READ_UUID,
            PAIRING_UUID,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_encode_truncates_long_names() {
        assert_eq!(encode_advertised_name("Samantha"), "PD_Saman");
        assert_eq!(encode_advertised_name("Sam"), "PD_Sam");
    }

    #[test]
    fn test_encode_counts_chars_not_bytes() {
        assert_eq!(encode_advertised_name("ÉlodieX"), "PD_Élodi");
    }

    #[test]
    fn test_decode_roundtrip_and_foreign_names() {
        assert_eq!(decode_advertised_name("PD_Sam"), Some("Sam".to_string()));
        assert_eq!(decode_advertised_name("PD_"), Some(String::new()));
        assert_eq!(decode_advertised_name("JBL Flip"), None);
        assert_eq!(decode_advertised_name("PD_TooLong"), None);
    }
}
