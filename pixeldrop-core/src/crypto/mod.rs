// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod mac;
pub mod payload;
pub mod secret;

pub use mac::{pairing_signature, verify_pairing_signature, SignedFlag, SIGNATURE_HEX_LEN};
pub use payload::{checksum, verify_checksum, CipherError, PayloadCipher, NONCE_SIZE, TAG_SIZE};
pub use secret::AppSecret;
