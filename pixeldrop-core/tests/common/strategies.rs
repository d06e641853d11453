// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable proptest strategies for property-based testing.

use proptest::prelude::*;

/// Plaintexts small enough to fit an attribute once sealed.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..300)
}

/// Non-empty plaintexts, for tamper tests.
pub fn non_empty_payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..300)
}

/// Application secrets of realistic length.
pub fn secret_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 8..64)
}

/// Six-digit pairing codes.
pub fn code_strategy() -> impl Strategy<Value = String> {
    "[0-9]{6}"
}

/// Display names as typed by a user.
pub fn display_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9 ]{0,19}"
}

/// Seconds past expiry.
pub fn seconds_late_strategy() -> impl Strategy<Value = i64> {
    0i64..86_400
}
