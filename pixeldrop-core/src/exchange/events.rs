// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exchange Events
//!
//! Payloads carried on the per-category event channels of the role
//! adapters. Each category has its own channel so ordering within a
//! category is preserved and consumers subscribe only to what they need.

use chrono::{DateTime, Utc};

use super::error::ExchangeError;
use super::message::PairingMethod;
use super::pairing::{ExchangeRole, PairingSession};

/// Capacity of every broadcast event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The operator must act on a pairing attempt.
///
/// For Numeric Comparison both sides show `code` and ask whether it
/// matches. For Passkey Entry the responder shows `code` and the initiator
/// asks the operator to type it, so `code` is only meant for display when
/// `role` is `Responder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingPrompt {
    pub peer_id: String,
    pub code: String,
    pub method: PairingMethod,
    pub role: ExchangeRole,
    pub expires_at: DateTime<Utc>,
}

impl PairingPrompt {
    pub fn from_session(session: &PairingSession) -> Self {
        PairingPrompt {
            peer_id: session.peer_id.clone(),
            code: session.code.clone(),
            method: session.method,
            role: session.role,
            expires_at: session.expires_at,
        }
    }

    /// Whether the operator should type the code rather than compare it.
    pub fn expects_passkey(&self) -> bool {
        self.method == PairingMethod::PasskeyEntry && self.role == ExchangeRole::Initiator
    }
}

/// A failure reported on a role's error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFailure {
    /// Peer involved, when the failure concerns one link.
    pub peer_id: Option<String>,
    pub role: ExchangeRole,
    pub error: ExchangeError,
}

impl ExchangeFailure {
    pub fn new(peer_id: Option<&str>, role: ExchangeRole, error: ExchangeError) -> Self {
        ExchangeFailure {
            peer_id: peer_id.map(str::to_string),
            role,
            error,
        }
    }
}
