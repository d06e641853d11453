// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Responder Role Adapter
//!
//! Advertises the exchange service, serves the local artifact on read and
//! answers inbound artifact writes with a notification carrying the local
//! artifact. Pairing writes are routed to a per-peer [`PairingProtocol`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::artifact::{ArtifactSealer, ExchangeArtifact, ReceivedArtifact};
use super::error::{ExchangeError, ExchangeResult};
use super::events::{ExchangeFailure, PairingPrompt, EVENT_CHANNEL_CAPACITY};
use super::message::PairingMessage;
use super::pairing::{ExchangeRole, PairingProtocol, PairingState, PairingUpdate};
use super::radio::{AdvertisingParams, PeripheralEvent, PeripheralRadio};
use super::registry::PairedPeerRegistry;
use super::schema::{
    encode_advertised_name, ARTIFACT_READ_UUID, ARTIFACT_WRITE_UUID, EXCHANGE_SERVICE_UUID,
    PAIRING_UUID,
};
use crate::config::ExchangeConfig;

#[derive(Default)]
struct ResponderInner {
    advertising: bool,
    local_artifact: Option<ExchangeArtifact>,
    peers: HashMap<String, PairingProtocol>,
    event_loop: Option<JoinHandle<()>>,
}

struct Shared {
    config: ExchangeConfig,
    radio: Arc<dyn PeripheralRadio>,
    registry: PairedPeerRegistry,
    sealer: ArtifactSealer,
    rotate_address: Mutex<bool>,
    received: broadcast::Sender<ReceivedArtifact>,
    prompts: broadcast::Sender<PairingPrompt>,
    pairing: broadcast::Sender<PairingUpdate>,
    errors: broadcast::Sender<ExchangeFailure>,
    inner: Mutex<ResponderInner>,
}

/// Responder role. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResponderRoleAdapter {
    shared: Arc<Shared>,
}

impl ResponderRoleAdapter {
    pub fn new(
        config: ExchangeConfig,
        radio: Arc<dyn PeripheralRadio>,
        registry: PairedPeerRegistry,
        sealer: ArtifactSealer,
    ) -> Self {
        ResponderRoleAdapter {
            shared: Arc::new(Shared {
                config,
                radio,
                registry,
                sealer,
                rotate_address: Mutex::new(false),
                received: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                prompts: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                pairing: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                errors: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                inner: Mutex::new(ResponderInner::default()),
            }),
        }
    }

    /// Advertise with a rotating private address from the next start on.
    pub fn set_address_rotation(&self, enabled: bool) {
        *self.shared.rotate_address.lock() = enabled;
    }

    pub fn is_advertising(&self) -> bool {
        self.shared.inner.lock().advertising
    }

    pub fn subscribe_received(&self) -> broadcast::Receiver<ReceivedArtifact> {
        self.shared.received.subscribe()
    }

    pub fn subscribe_prompts(&self) -> broadcast::Receiver<PairingPrompt> {
        self.shared.prompts.subscribe()
    }

    pub fn subscribe_pairing(&self) -> broadcast::Receiver<PairingUpdate> {
        self.shared.pairing.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ExchangeFailure> {
        self.shared.errors.subscribe()
    }

    /// Pairing state for a connected peer, if one is tracked.
    pub fn pairing_state(&self, peer_id: &str) -> Option<PairingState> {
        self.shared
            .inner
            .lock()
            .peers
            .get(peer_id)
            .map(|p| p.state().clone())
    }

    fn report(&self, peer_id: Option<&str>, error: &ExchangeError) {
        let _ = self.shared.errors.send(ExchangeFailure::new(
            peer_id,
            ExchangeRole::Responder,
            error.clone(),
        ));
    }

    /// Starts advertising `display_name` and serving `artifact`.
    pub async fn start_advertising(
        &self,
        display_name: &str,
        artifact: ExchangeArtifact,
    ) -> ExchangeResult<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.advertising {
                return Err(ExchangeError::InvalidState("already advertising".into()));
            }
            inner.advertising = true;
        }

        match self.start_radio(display_name, &artifact).await {
            Ok(events) => {
                self.shared.inner.lock().local_artifact = Some(artifact);
                let this = self.clone();
                let handle = tokio::spawn(async move { this.run_events(events).await });
                self.shared.inner.lock().event_loop = Some(handle);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Failed to start advertising");
                self.shared.inner.lock().advertising = false;
                self.report(None, &err);
                Err(err)
            }
        }
    }

    async fn start_radio(
        &self,
        display_name: &str,
        artifact: &ExchangeArtifact,
    ) -> ExchangeResult<mpsc::UnboundedReceiver<PeripheralEvent>> {
        let sealed = self.shared.sealer.seal(artifact)?;
        let mut attributes = vec![ARTIFACT_WRITE_UUID, ARTIFACT_READ_UUID];
        if self.shared.config.require_pairing {
            attributes.push(PAIRING_UUID);
        }
        let params = AdvertisingParams {
            local_name: encode_advertised_name(display_name),
            service_uuid: EXCHANGE_SERVICE_UUID,
            attributes,
            rotate_address: *self.shared.rotate_address.lock(),
        };

        let events = self.shared.radio.start_advertising(params).await?;
        if let Err(err) = self
            .shared
            .radio
            .set_attribute_value(ARTIFACT_READ_UUID, sealed)
            .await
        {
            let _ = self.shared.radio.stop_advertising().await;
            return Err(err);
        }
        info!(name = display_name, "Advertising");
        Ok(events)
    }

    /// Stops advertising and drops every connected peer. Idempotent.
    pub async fn stop_advertising(&self) -> ExchangeResult<()> {
        let (was_advertising, handle) = {
            let mut inner = self.shared.inner.lock();
            let was = inner.advertising;
            inner.advertising = false;
            inner.local_artifact = None;
            for protocol in inner.peers.values_mut() {
                protocol.abandon(ExchangeError::Disconnected);
            }
            inner.peers.clear();
            (was, inner.event_loop.take())
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        if !was_advertising {
            return Ok(());
        }
        info!("Advertising stopped");
        self.shared.radio.stop_advertising().await
    }

    /// Operator verdict for a Numeric Comparison prompt from `peer_id`.
    pub async fn confirm_pairing(&self, peer_id: &str, matched: bool) -> ExchangeResult<PairingState> {
        self.with_protocol(peer_id, |p| p.confirm(matched)).await
    }

    /// Operator-typed code for a Passkey Entry prompt from `peer_id`.
    pub async fn submit_passkey(&self, peer_id: &str, entered: &str) -> ExchangeResult<PairingState> {
        self.with_protocol(peer_id, |p| p.submit_passkey(entered))
            .await
    }

    async fn with_protocol<F>(&self, peer_id: &str, f: F) -> ExchangeResult<PairingState>
    where
        F: FnOnce(&mut PairingProtocol) -> ExchangeResult<PairingState>,
    {
        let (result, outbound) = {
            let mut inner = self.shared.inner.lock();
            let protocol = inner
                .peers
                .get_mut(peer_id)
                .ok_or_else(|| ExchangeError::InvalidState(format!("no pairing with {peer_id}")))?;
            let result = f(protocol);
            (result, protocol.drain_outbound())
        };
        self.send_pairing(peer_id, outbound).await;
        result
    }

    async fn send_pairing(&self, peer_id: &str, outbound: Vec<PairingMessage>) {
        for message in outbound {
            let sent = match message.to_bytes() {
                Ok(bytes) => self.shared.radio.notify(peer_id, PAIRING_UUID, bytes).await,
                Err(err) => Err(err),
            };
            if let Err(err) = sent {
                warn!(peer_id, error = %err, "Failed to send pairing message");
                self.report(Some(peer_id), &err);
            }
        }
    }

    async fn run_events(&self, mut events: mpsc::UnboundedReceiver<PeripheralEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PeripheralEvent::Connected { peer_id } => {
                    debug!(peer_id = %peer_id, "Central connected");
                }
                PeripheralEvent::Disconnected { peer_id } => {
                    debug!(peer_id = %peer_id, "Central disconnected");
                    let removed = self.shared.inner.lock().peers.remove(&peer_id);
                    if let Some(mut protocol) = removed {
                        if protocol.abandon(ExchangeError::Disconnected) {
                            self.report(Some(&peer_id), &ExchangeError::Disconnected);
                        }
                    }
                }
                PeripheralEvent::Write {
                    peer_id,
                    attribute,
                    value,
                } => {
                    if attribute == PAIRING_UUID {
                        self.on_pairing_write(&peer_id, &value).await;
                    } else if attribute == ARTIFACT_WRITE_UUID {
                        self.on_artifact_write(&peer_id, &value).await;
                    } else {
                        debug!(peer_id = %peer_id, %attribute, "Ignoring write to unknown attribute");
                    }
                }
            }
        }
        debug!("Responder event stream closed");
    }

    async fn on_pairing_write(&self, peer_id: &str, value: &[u8]) {
        let kind = match PairingMessage::from_bytes(value) {
            Ok(message) => message,
            Err(err) => {
                debug!(peer_id, error = %err, "Dropping malformed pairing write");
                return;
            }
        };

        let (prompt, outbound) = {
            let mut inner = self.shared.inner.lock();
            match kind {
                PairingMessage::PairingRequest(_) => {
                    let protocol = inner.peers.entry(peer_id.to_string()).or_insert_with(|| {
                        PairingProtocol::new(
                            &self.shared.config.device_id,
                            self.shared.config.secret.clone(),
                            self.shared.registry.clone(),
                        )
                        .with_validity(self.shared.config.code_validity)
                        .with_updates(self.shared.pairing.clone())
                    });
                    let prompt = protocol
                        .handle_incoming_request(peer_id, value)
                        .map(|session| PairingPrompt::from_session(&session));
                    (prompt, protocol.drain_outbound())
                }
                PairingMessage::PairingConfirmation(_) => {
                    let Some(protocol) = inner.peers.get_mut(peer_id) else {
                        debug!(peer_id, "Confirmation without a pairing session");
                        return;
                    };
                    if let Err(err) = protocol.handle_incoming_confirmation(value) {
                        debug!(peer_id, error = %err, "Pairing confirmation not accepted");
                    }
                    (None, protocol.drain_outbound())
                }
            }
        };

        if let Some(prompt) = prompt {
            info!(peer_id, method = %prompt.method, "Pairing requested");
            self.spawn_pairing_deadline(peer_id, prompt.code.clone());
            let _ = self.shared.prompts.send(prompt);
        }
        self.send_pairing(peer_id, outbound).await;
    }

    /// Fails the session with `code` if it has not ended within the
    /// pairing timeout.
    fn spawn_pairing_deadline(&self, peer_id: &str, code: String) {
        let this = self.clone();
        let peer_id = peer_id.to_string();
        let timeout = self.shared.config.pairing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let mut inner = this.shared.inner.lock();
                match inner.peers.get_mut(&peer_id) {
                    Some(protocol) if protocol.session().is_some_and(|s| s.code == code) => {
                        protocol.abandon(ExchangeError::PairingTimeout)
                    }
                    _ => false,
                }
            };
            if expired {
                warn!(peer_id = %peer_id, "No pairing verdict before timeout");
                this.report(Some(&peer_id), &ExchangeError::PairingTimeout);
            }
        });
    }

    fn may_exchange_with(&self, peer_id: &str) -> bool {
        if !self.shared.config.require_pairing || self.shared.registry.contains(peer_id) {
            return true;
        }
        self.shared
            .inner
            .lock()
            .peers
            .get(peer_id)
            .is_some_and(|p| *p.state() == PairingState::Paired)
    }

    async fn on_artifact_write(&self, peer_id: &str, value: &[u8]) {
        if !self.may_exchange_with(peer_id) {
            warn!(peer_id, "Artifact write from unpaired peer");
            self.shared.radio.disconnect_peer(peer_id).await;
            self.report(
                Some(peer_id),
                &ExchangeError::InvalidState("peer is not paired".into()),
            );
            return;
        }

        let artifact = match self.shared.sealer.open(value) {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(peer_id, error = %err, "Rejecting inbound artifact");
                self.report(Some(peer_id), &err);
                return;
            }
        };

        let received = ReceivedArtifact::new(peer_id, artifact, ExchangeRole::Responder);
        info!(peer_id, title = received.artifact.title(), "Artifact received");
        let _ = self.shared.received.send(received);

        let local = self.shared.inner.lock().local_artifact.clone();
        let Some(local) = local else {
            return;
        };
        let reply = match self.shared.sealer.seal(&local) {
            Ok(sealed) => {
                self.shared
                    .radio
                    .notify(peer_id, ARTIFACT_READ_UUID, sealed)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = reply {
            warn!(peer_id, error = %err, "Failed to send local artifact");
            self.report(Some(peer_id), &err);
        }
    }
}
