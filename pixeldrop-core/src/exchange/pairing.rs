// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pairing Protocol State Machine
//!
//! Authenticates one radio link with a short human-verified code before any
//! artifact bytes move. Each peer runs its own instance:
//!
//! ```text
//! NotPaired -> Initiating -> DisplayingCode | AwaitingPasskey -> Verifying -> Paired | Failed
//! ```
//!
//! The protocol does no I/O. Messages it wants to send are queued and
//! collected with [`PairingProtocol::drain_outbound`]; the owning role adapter
//! writes them to the pairing attribute.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::error::{ExchangeError, ExchangeResult};
use super::message::{PairingConfirmation, PairingMessage, PairingMethod, PairingRequest};
use super::registry::PairedPeerRegistry;
use super::schema::{PAIRING_CODE_LENGTH, PAIRING_CODE_VALIDITY};
use crate::crypto::{pairing_signature, verify_pairing_signature, AppSecret, SignedFlag};

/// Role of this device on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeRole {
    /// Scanned, connected and sent the pairing request.
    Initiator,
    /// Advertised and accepted the connection.
    Responder,
}

/// State of a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// No session
    NotPaired,
    /// Session being set up
    Initiating,
    /// Code shown to the operator
    DisplayingCode,
    /// Waiting for the operator to type the peer's code
    AwaitingPasskey,
    /// Confirmation exchanged, verdict pending
    Verifying,
    /// Link authenticated (terminal)
    Paired,
    /// Attempt over (terminal)
    Failed(ExchangeError),
}

impl PairingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingState::Paired | PairingState::Failed(_))
    }

    /// Whether the operator is being shown or asked for a code.
    pub fn is_prompting(&self) -> bool {
        matches!(
            self,
            PairingState::DisplayingCode | PairingState::AwaitingPasskey
        )
    }

    fn can_transition_to(&self, next: &PairingState) -> bool {
        use PairingState::*;
        match (self, next) {
            (_, NotPaired) => true,
            (NotPaired | Paired | Failed(_), Initiating) => true,
            (Initiating, DisplayingCode | AwaitingPasskey) => true,
            (DisplayingCode | AwaitingPasskey, Verifying) => true,
            (Verifying, Paired) => true,
            (Initiating | DisplayingCode | AwaitingPasskey | Verifying, Failed(_)) => true,
            _ => false,
        }
    }
}

/// One live pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSession {
    pub peer_id: String,
    pub code: String,
    pub method: PairingMethod,
    pub expires_at: DateTime<Utc>,
    pub role: ExchangeRole,
    /// Device id announced by the initiator (responder side only).
    pub remote_device_id: Option<String>,
}

impl PairingSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Published on every pairing state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUpdate {
    pub peer_id: String,
    pub state: PairingState,
}

/// Generates a uniformly random six-digit code.
pub fn generate_pairing_code() -> String {
    let value: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
    format!("{value:0width$}", width = PAIRING_CODE_LENGTH)
}

/// Per-link pairing state machine.
pub struct PairingProtocol {
    device_id: String,
    secret: AppSecret,
    validity: Duration,
    registry: PairedPeerRegistry,
    session: Option<PairingSession>,
    state: PairingState,
    outbound: VecDeque<PairingMessage>,
    updates: Option<broadcast::Sender<PairingUpdate>>,
}

impl PairingProtocol {
    /// Creates an idle protocol instance.
    pub fn new(device_id: &str, secret: AppSecret, registry: PairedPeerRegistry) -> Self {
        PairingProtocol {
            device_id: device_id.to_string(),
            secret,
            validity: Duration::from_std(PAIRING_CODE_VALIDITY).unwrap_or(Duration::seconds(60)),
            registry,
            session: None,
            state: PairingState::NotPaired,
            outbound: VecDeque::new(),
            updates: None,
        }
    }

    /// Overrides the code validity window.
    pub fn with_validity(mut self, validity: std::time::Duration) -> Self {
        if let Ok(validity) = Duration::from_std(validity) {
            self.validity = validity;
        }
        self
    }

    /// Publishes state changes on `updates`.
    pub fn with_updates(mut self, updates: broadcast::Sender<PairingUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn state(&self) -> &PairingState {
        &self.state
    }

    pub fn session(&self) -> Option<&PairingSession> {
        self.session.as_ref()
    }

    /// Takes the messages queued for the peer, oldest first.
    pub fn drain_outbound(&mut self) -> Vec<PairingMessage> {
        self.outbound.drain(..).collect()
    }

    fn transition(&mut self, next: PairingState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(&next) {
            warn!(from = ?self.state, to = ?next, "Ignoring invalid pairing transition");
            return;
        }
        debug!(from = ?self.state, to = ?next, "Pairing transition");
        self.state = next.clone();

        if let (Some(updates), Some(session)) = (&self.updates, &self.session) {
            let _ = updates.send(PairingUpdate {
                peer_id: session.peer_id.clone(),
                state: next,
            });
        }
    }

    fn fail(&mut self, error: ExchangeError) -> ExchangeError {
        if let Some(session) = &self.session {
            info!(peer_id = %session.peer_id, reason = %error, "Pairing failed");
        }
        self.transition(PairingState::Failed(error.clone()));
        error
    }

    fn queue_confirmation(&mut self, code: &str, confirmed: bool) {
        let signature = pairing_signature(&self.secret, code, SignedFlag::Confirmed(confirmed));
        self.outbound
            .push_back(PairingMessage::PairingConfirmation(PairingConfirmation {
                confirmed,
                code: code.to_string(),
                signature,
            }));
    }

    fn mark_paired(&mut self) -> PairingState {
        if let Some(session) = &self.session {
            self.registry.insert(&session.peer_id, &session.code);
            info!(peer_id = %session.peer_id, "Pairing complete");
        }
        self.transition(PairingState::Paired);
        self.state.clone()
    }

    fn start_session(&mut self, session: PairingSession) {
        self.outbound.clear();
        self.session = Some(session);
        self.transition(PairingState::Initiating);
    }

    /// Starts pairing as the initiator.
    pub fn initiate(&mut self, peer_id: &str, method: PairingMethod) -> ExchangeResult<PairingSession> {
        self.initiate_at(peer_id, method, Utc::now())
    }

    /// Starts pairing at a specific time (for testing).
    pub fn initiate_at(
        &mut self,
        peer_id: &str,
        method: PairingMethod,
        now: DateTime<Utc>,
    ) -> ExchangeResult<PairingSession> {
        if self.session.is_some() && !self.state.is_terminal() {
            return Err(ExchangeError::InvalidState(
                "pairing already in progress".into(),
            ));
        }

        let code = generate_pairing_code();
        let expires_at = now + self.validity;
        let signature = pairing_signature(&self.secret, &code, SignedFlag::Request);

        self.start_session(PairingSession {
            peer_id: peer_id.to_string(),
            code: code.clone(),
            method,
            expires_at,
            role: ExchangeRole::Initiator,
            remote_device_id: None,
        });

        self.outbound
            .push_back(PairingMessage::PairingRequest(PairingRequest {
                code,
                method,
                device_id: self.device_id.clone(),
                expires_at,
                signature,
            }));

        self.transition(match method {
            PairingMethod::NumericComparison => PairingState::DisplayingCode,
            PairingMethod::PasskeyEntry => PairingState::AwaitingPasskey,
        });

        self.session
            .clone()
            .ok_or_else(|| ExchangeError::InvalidState("session missing after initiate".into()))
    }

    /// Accepts a pairing request from `peer_id`.
    ///
    /// Returns `None` for anything that is not a valid, unexpired, correctly
    /// signed request; such input is treated as if it never arrived.
    pub fn handle_incoming_request(&mut self, peer_id: &str, bytes: &[u8]) -> Option<PairingSession> {
        self.handle_incoming_request_at(peer_id, bytes, Utc::now())
    }

    /// Accepts a pairing request at a specific time (for testing).
    pub fn handle_incoming_request_at(
        &mut self,
        peer_id: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Option<PairingSession> {
        let request = match PairingMessage::from_bytes(bytes) {
            Ok(PairingMessage::PairingRequest(request)) => request,
            Ok(PairingMessage::PairingConfirmation(_)) => {
                debug!(peer_id, "Expected pairing request, got confirmation");
                return None;
            }
            Err(err) => {
                debug!(peer_id, error = %err, "Dropping malformed pairing request");
                return None;
            }
        };

        if now >= request.expires_at {
            debug!(peer_id, "Dropping expired pairing request");
            return None;
        }

        if !verify_pairing_signature(
            &self.secret,
            &request.code,
            SignedFlag::Request,
            &request.signature,
        ) {
            warn!(peer_id, "Dropping pairing request with invalid signature");
            return None;
        }

        if self.session.is_some() && !self.state.is_terminal() {
            debug!(peer_id, "Replacing in-progress pairing session");
            self.transition(PairingState::NotPaired);
        }

        self.start_session(PairingSession {
            peer_id: peer_id.to_string(),
            code: request.code,
            method: request.method,
            expires_at: request.expires_at,
            role: ExchangeRole::Responder,
            remote_device_id: Some(request.device_id),
        });
        self.transition(PairingState::DisplayingCode);

        self.session.clone()
    }

    /// Numeric Comparison: the operator says whether both codes matched.
    pub fn confirm(&mut self, matched: bool) -> ExchangeResult<PairingState> {
        self.confirm_at(matched, Utc::now())
    }

    /// Confirms at a specific time (for testing).
    pub fn confirm_at(&mut self, matched: bool, now: DateTime<Utc>) -> ExchangeResult<PairingState> {
        let session = self.prompting_session()?;
        if session.method != PairingMethod::NumericComparison {
            return Err(ExchangeError::InvalidState(
                "confirm is only valid for numeric comparison".into(),
            ));
        }
        self.conclude_locally(session, matched, now)
    }

    /// Passkey Entry: compares the typed code with the session code.
    pub fn submit_passkey(&mut self, entered: &str) -> ExchangeResult<PairingState> {
        self.submit_passkey_at(entered, Utc::now())
    }

    /// Submits a passkey at a specific time (for testing).
    pub fn submit_passkey_at(
        &mut self,
        entered: &str,
        now: DateTime<Utc>,
    ) -> ExchangeResult<PairingState> {
        let session = self.prompting_session()?;
        if self.state != PairingState::AwaitingPasskey {
            return Err(ExchangeError::InvalidState(
                "not waiting for a passkey".into(),
            ));
        }

        let matched = entered.len() == session.code.len()
            && bool::from(entered.as_bytes().ct_eq(session.code.as_bytes()));
        self.conclude_locally(session, matched, now)
    }

    fn prompting_session(&self) -> ExchangeResult<PairingSession> {
        match &self.session {
            Some(session) if !self.state.is_terminal() => Ok(session.clone()),
            Some(_) => Err(ExchangeError::InvalidState(format!(
                "pairing already finished: {:?}",
                self.state
            ))),
            None => Err(ExchangeError::InvalidState("no pairing session".into())),
        }
    }

    fn conclude_locally(
        &mut self,
        session: PairingSession,
        matched: bool,
        now: DateTime<Utc>,
    ) -> ExchangeResult<PairingState> {
        if session.is_expired_at(now) {
            return Err(self.fail(ExchangeError::PairingExpired));
        }
        if !self.state.is_prompting() {
            return Err(ExchangeError::InvalidState(format!(
                "cannot conclude pairing from {:?}",
                self.state
            )));
        }

        self.transition(PairingState::Verifying);
        self.queue_confirmation(&session.code, matched);

        if matched {
            Ok(self.mark_paired())
        } else {
            Err(self.fail(ExchangeError::PairingRejected))
        }
    }

    /// Processes the peer's signed confirmation.
    ///
    /// The signature is checked against the locally held code; a message
    /// that does not verify never counts as confirming.
    pub fn handle_incoming_confirmation(&mut self, bytes: &[u8]) -> ExchangeResult<PairingState> {
        self.handle_incoming_confirmation_at(bytes, Utc::now())
    }

    /// Processes a confirmation at a specific time (for testing).
    pub fn handle_incoming_confirmation_at(
        &mut self,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> ExchangeResult<PairingState> {
        let session = match (&self.session, &self.state) {
            (Some(_), PairingState::Paired) => return Ok(PairingState::Paired),
            (Some(_), PairingState::Failed(reason)) => return Err(reason.clone()),
            (Some(session), _) => session.clone(),
            (None, _) => return Err(ExchangeError::InvalidState("no pairing session".into())),
        };

        if session.is_expired_at(now) {
            return Err(self.fail(ExchangeError::PairingExpired));
        }

        let confirmation = match PairingMessage::from_bytes(bytes)? {
            PairingMessage::PairingConfirmation(confirmation) => confirmation,
            PairingMessage::PairingRequest(_) => {
                return Err(ExchangeError::MalformedMessage(
                    "expected pairing confirmation".into(),
                ))
            }
        };

        let code_matches = bool::from(confirmation.code.as_bytes().ct_eq(session.code.as_bytes()));
        let signature_valid = verify_pairing_signature(
            &self.secret,
            &session.code,
            SignedFlag::Confirmed(confirmation.confirmed),
            &confirmation.signature,
        );
        if !code_matches || !signature_valid {
            return Err(self.fail(ExchangeError::PairingSignatureInvalid));
        }

        if !confirmation.confirmed {
            return Err(self.fail(ExchangeError::PairingRejected));
        }

        if !self.state.is_prompting() && self.state != PairingState::Verifying {
            return Err(ExchangeError::InvalidState(format!(
                "unexpected confirmation in {:?}",
                self.state
            )));
        }

        self.transition(PairingState::Verifying);
        Ok(self.mark_paired())
    }

    /// Fails the session because no confirmation arrived in time.
    pub fn fail_timeout(&mut self) -> ExchangeError {
        self.abandon(ExchangeError::PairingTimeout);
        ExchangeError::PairingTimeout
    }

    /// Ends a live session with `reason`.
    ///
    /// Returns `false` when there was no session or it had already ended.
    pub fn abandon(&mut self, reason: ExchangeError) -> bool {
        if self.session.is_none() || self.state.is_terminal() {
            return false;
        }
        self.fail(reason);
        true
    }

    /// Discards the current session. Safe from any state.
    pub fn reset(&mut self) {
        self.transition(PairingState::NotPaired);
        self.session = None;
        self.outbound.clear();
    }
}

// INLINE_TEST_REQUIRED: Tests private transition table and outbound queue
#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> PairingProtocol {
        PairingProtocol::new("device-a", AppSecret::default(), PairedPeerRegistry::new())
    }

    #[test]
    fn test_generated_code_is_six_digits() {
        for _ in 0..100 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_transition_table_requires_prompt_before_paired() {
        use PairingState::*;
        assert!(!NotPaired.can_transition_to(&Paired));
        assert!(!Initiating.can_transition_to(&Paired));
        assert!(!Initiating.can_transition_to(&Verifying));
        assert!(DisplayingCode.can_transition_to(&Verifying));
        assert!(Verifying.can_transition_to(&Paired));
        assert!(!Paired.can_transition_to(&Failed(ExchangeError::PairingTimeout)));
    }

    #[test]
    fn test_initiate_queues_signed_request() {
        let mut p = protocol();
        let session = p
            .initiate("peer-b", PairingMethod::NumericComparison)
            .unwrap();

        let outbound = p.drain_outbound();
        assert_eq!(outbound.len(), 1);
        match &outbound[0] {
            PairingMessage::PairingRequest(req) => {
                assert_eq!(req.code, session.code);
                assert_eq!(req.device_id, "device-a");
                assert!(verify_pairing_signature(
                    &AppSecret::default(),
                    &req.code,
                    SignedFlag::Request,
                    &req.signature
                ));
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert!(p.drain_outbound().is_empty());
    }

    #[test]
    fn test_initiate_twice_rejected_while_live() {
        let mut p = protocol();
        p.initiate("peer-b", PairingMethod::NumericComparison)
            .unwrap();

        assert!(matches!(
            p.initiate("peer-b", PairingMethod::NumericComparison),
            Err(ExchangeError::InvalidState(_))
        ));
    }

    #[test]
    fn test_fail_timeout_from_prompt() {
        let mut p = protocol();
        p.initiate("peer-b", PairingMethod::PasskeyEntry).unwrap();

        assert_eq!(p.fail_timeout(), ExchangeError::PairingTimeout);
        assert_eq!(
            p.state(),
            &PairingState::Failed(ExchangeError::PairingTimeout)
        );
    }

    #[test]
    fn test_wrong_passkey_fails_and_signs_rejection() {
        let mut p = protocol();
        p.initiate("peer-b", PairingMethod::PasskeyEntry).unwrap();
        p.drain_outbound();
        if let Some(session) = p.session.as_mut() {
            session.code = "482193".into();
        }

        assert_eq!(p.submit_passkey("000000"), Err(ExchangeError::PairingRejected));
        assert_eq!(
            p.state(),
            &PairingState::Failed(ExchangeError::PairingRejected)
        );
        assert!(!p.registry.contains("peer-b"));

        match p.drain_outbound().as_slice() {
            [PairingMessage::PairingConfirmation(c)] => {
                assert!(!c.confirmed);
                assert_eq!(c.code, "482193");
            }
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn test_right_passkey_pairs() {
        let mut p = protocol();
        p.initiate("peer-b", PairingMethod::PasskeyEntry).unwrap();
        if let Some(session) = p.session.as_mut() {
            session.code = "482193".into();
        }

        assert_eq!(p.submit_passkey("482193"), Ok(PairingState::Paired));
        assert_eq!(p.registry.code_for("peer-b").as_deref(), Some("482193"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut p = protocol();
        p.initiate("peer-b", PairingMethod::NumericComparison)
            .unwrap();
        p.reset();

        assert_eq!(p.state(), &PairingState::NotPaired);
        assert!(p.session().is_none());
        assert!(p.drain_outbound().is_empty());

        p.reset();
        assert_eq!(p.state(), &PairingState::NotPaired);
    }
}
