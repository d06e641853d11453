// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Coordinator (initiator role)
//!
//! Scans for peers advertising the exchange service, connects to one,
//! resolves its attributes, runs the initiator side of pairing and then
//! swaps artifacts:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Connected -> Exchanging -> Disconnected
//! ```
//!
//! Every exit path of [`ConnectionCoordinator::connect_and_exchange`]
//! disconnects the link and returns the state to `Disconnected`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::artifact::{ArtifactSealer, ExchangeArtifact, ReceivedArtifact};
use super::error::{ExchangeError, ExchangeResult};
use super::events::{ExchangeFailure, PairingPrompt, EVENT_CHANNEL_CAPACITY};
use super::pairing::{ExchangeRole, PairingProtocol, PairingState, PairingUpdate};
use super::radio::{Advertisement, CentralRadio, ConnectionState, DiscoveredPeer, PeerLink};
use super::registry::PairedPeerRegistry;
use super::schema::{
    decode_advertised_name, ARTIFACT_READ_UUID, ARTIFACT_WRITE_UUID, EXCHANGE_SERVICE_UUID,
    PAIRING_UUID, REQUIRED_ATTRIBUTES,
};
use crate::config::ExchangeConfig;

/// Operator input forwarded to the in-flight pairing flow.
enum PairingAction {
    Confirm(bool),
    Passkey(String),
}

struct PairingCommand {
    action: PairingAction,
    reply: oneshot::Sender<ExchangeResult<PairingState>>,
}

#[derive(Default)]
struct CoordinatorInner {
    local_artifact: Option<ExchangeArtifact>,
    discovered: HashMap<String, DiscoveredPeer>,
    scan_cancel: Option<CancellationToken>,
    scan_generation: u64,
    exchange_cancel: Option<CancellationToken>,
    pairing_commands: Option<mpsc::UnboundedSender<PairingCommand>>,
}

struct Shared {
    config: ExchangeConfig,
    radio: Arc<dyn CentralRadio>,
    registry: PairedPeerRegistry,
    sealer: ArtifactSealer,
    state: watch::Sender<ConnectionState>,
    discovery: broadcast::Sender<DiscoveredPeer>,
    prompts: broadcast::Sender<PairingPrompt>,
    pairing: broadcast::Sender<PairingUpdate>,
    errors: broadcast::Sender<ExchangeFailure>,
    inner: Mutex<CoordinatorInner>,
}

/// Initiator role. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionCoordinator {
    shared: Arc<Shared>,
}

impl ConnectionCoordinator {
    pub fn new(
        config: ExchangeConfig,
        radio: Arc<dyn CentralRadio>,
        registry: PairedPeerRegistry,
        sealer: ArtifactSealer,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionCoordinator {
            shared: Arc::new(Shared {
                config,
                radio,
                registry,
                sealer,
                state,
                discovery: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                prompts: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                pairing: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                errors: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                inner: Mutex::new(CoordinatorInner::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Discovery updates, one per sighting, replace-by-`peer_id`.
    pub fn subscribe_discovery(&self) -> broadcast::Receiver<DiscoveredPeer> {
        self.shared.discovery.subscribe()
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

    /// Current rolling discovery view.
    pub fn discovered_peers(&self) -> Vec<DiscoveredPeer> {
        let mut peers: Vec<_> = self.shared.inner.lock().discovered.values().cloned().collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    fn transition(&self, next: ConnectionState) -> bool {
        self.shared.state.send_if_modified(|current| {
            if *current == next || !current.can_transition_to(next) {
                return false;
            }
            debug!(from = ?*current, to = ?next, "Connection state");
            *current = next;
            true
        })
    }

    fn report(&self, peer_id: Option<&str>, error: &ExchangeError) {
        let _ = self.shared.errors.send(ExchangeFailure::new(
            peer_id,
            ExchangeRole::Initiator,
            error.clone(),
        ));
    }

    /// Starts discovery and remembers the artifact to offer.
    ///
    /// Stops on its own after `timeout`. Rejected with `InvalidState` while
    /// a scan or a connection is already active.
    pub async fn start_scanning(
        &self,
        artifact: ExchangeArtifact,
        timeout: Duration,
    ) -> ExchangeResult<()> {
        if !self.transition(ConnectionState::Scanning) {
            return Err(ExchangeError::InvalidState(format!(
                "cannot scan while {:?}",
                self.state()
            )));
        }

        let ads = match self.shared.radio.start_scan(EXCHANGE_SERVICE_UUID).await {
            Ok(ads) => ads,
            Err(err) => {
                warn!(error = %err, "Failed to start scanning");
                self.transition(ConnectionState::Disconnected);
                self.report(None, &err);
                return Err(err);
            }
        };

        let token = CancellationToken::new();
        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.local_artifact = Some(artifact);
            inner.discovered.clear();
            inner.scan_cancel = Some(token.clone());
            inner.scan_generation += 1;
            inner.scan_generation
        };

        info!(timeout_secs = timeout.as_secs(), "Scanning for peers");
        let this = self.clone();
        tokio::spawn(async move {
            this.run_scan(ads, token, generation, timeout).await;
        });
        Ok(())
    }

    async fn run_scan(
        &self,
        mut ads: mpsc::UnboundedReceiver<Advertisement>,
        token: CancellationToken,
        generation: u64,
        timeout: Duration,
    ) {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let expiry = self.shared.config.discovery_expiry;
        let mut prune = tokio::time::interval(expiry.max(Duration::from_millis(100)) / 2);

        let mut sighted = false;
        let timed_out = loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = &mut deadline => break true,
                _ = prune.tick() => self.prune_discovered(expiry),
                ad = ads.recv() => match ad {
                    Some(ad) => sighted |= self.on_advertisement(ad),
                    None => break false,
                },
            }
        };

        let still_current = {
            let mut inner = self.shared.inner.lock();
            let current = inner.scan_generation == generation && !token.is_cancelled();
            if current {
                inner.scan_cancel = None;
                inner.discovered.clear();
            }
            current
        };
        if !still_current {
            return;
        }

        self.shared.radio.stop_scan().await;
        let stopped = self.shared.state.send_if_modified(|s| {
            if *s == ConnectionState::Scanning {
                *s = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if stopped && timed_out {
            info!("Scan window elapsed");
            if !sighted {
                self.report(None, &ExchangeError::ScanTimeout);
            }
        }
    }

    fn on_advertisement(&self, ad: Advertisement) -> bool {
        let named = ad
            .local_name
            .as_deref()
            .and_then(decode_advertised_name)
            .is_some();
        if !named && !ad.service_uuids.contains(&EXCHANGE_SERVICE_UUID) {
            return false;
        }

        let peer = DiscoveredPeer::from_advertisement(&ad, Instant::now().into_std());
        debug!(peer_id = %peer.peer_id, rssi = peer.signal_strength, "Peer sighted");
        self.shared
            .inner
            .lock()
            .discovered
            .insert(peer.peer_id.clone(), peer.clone());
        let _ = self.shared.discovery.send(peer);
        true
    }

    fn prune_discovered(&self, expiry: Duration) {
        let now = Instant::now().into_std();
        self.shared
            .inner
            .lock()
            .discovered
            .retain(|_, peer| now.duration_since(peer.observed_at) < expiry);
    }

    /// Stops discovery. Idempotent; never fails.
    pub async fn stop_scanning(&self) {
        let token = {
            let mut inner = self.shared.inner.lock();
            inner.discovered.clear();
            inner.scan_cancel.take()
        };
        if let Some(token) = token {
            token.cancel();
            self.shared.radio.stop_scan().await;
            debug!("Scanning stopped");
        }
        self.shared.state.send_if_modified(|s| {
            if *s == ConnectionState::Scanning {
                *s = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// Stops scanning and aborts any in-flight exchange.
    pub async fn shutdown(&self) {
        let exchange = self.shared.inner.lock().exchange_cancel.take();
        if let Some(token) = exchange {
            token.cancel();
        }
        self.stop_scanning().await;
    }

    /// Operator verdict for a Numeric Comparison prompt.
    pub async fn confirm_pairing(&self, matched: bool) -> ExchangeResult<PairingState> {
        self.send_pairing_action(PairingAction::Confirm(matched))
            .await
    }

    /// Operator-typed code for a Passkey Entry prompt.
    pub async fn submit_passkey(&self, entered: &str) -> ExchangeResult<PairingState> {
        self.send_pairing_action(PairingAction::Passkey(entered.to_string()))
            .await
    }

    async fn send_pairing_action(&self, action: PairingAction) -> ExchangeResult<PairingState> {
        let commands = self
            .shared
            .inner
            .lock()
            .pairing_commands
            .clone()
            .ok_or_else(|| ExchangeError::InvalidState("no pairing in progress".into()))?;

        let (reply, response) = oneshot::channel();
        commands
            .send(PairingCommand { action, reply })
            .map_err(|_| ExchangeError::InvalidState("pairing already finished".into()))?;
        response
            .await
            .map_err(|_| ExchangeError::InvalidState("pairing already finished".into()))?
    }

    /// Connects to `peer_id`, pairs if needed, and swaps artifacts.
    ///
    /// Stops scanning first. The returned artifact has been decrypted and
    /// tagged with receipt metadata. Always ends `Disconnected`.
    pub async fn connect_and_exchange(
        &self,
        peer_id: &str,
        skip_pairing: bool,
    ) -> ExchangeResult<ReceivedArtifact> {
        let artifact = self
            .shared
            .inner
            .lock()
            .local_artifact
            .clone()
            .ok_or_else(|| ExchangeError::InvalidState("no artifact to offer".into()))?;

        let current = self.state();
        if !matches!(
            current,
            ConnectionState::Disconnected | ConnectionState::Scanning
        ) {
            return Err(ExchangeError::InvalidState(format!(
                "cannot connect while {current:?}"
            )));
        }
        self.stop_scanning().await;
        if !self.transition(ConnectionState::Connecting) {
            return Err(ExchangeError::InvalidState(format!(
                "cannot connect while {:?}",
                self.state()
            )));
        }

        let token = CancellationToken::new();
        self.shared.inner.lock().exchange_cancel = Some(token.clone());

        info!(peer_id, "Connecting to peer");
        let result = tokio::select! {
            _ = token.cancelled() => Err(ExchangeError::Disconnected),
            result = self.connect_with_retry(peer_id) => result,
        };

        let result = match result {
            Ok(link) => {
                self.transition(ConnectionState::Connected);
                let outcome = tokio::select! {
                    _ = token.cancelled() => Err(ExchangeError::Disconnected),
                    outcome = self.exchange_on_link(link.as_ref(), &artifact, skip_pairing) => outcome,
                };
                link.disconnect().await;
                outcome
            }
            Err(err) => Err(err),
        };

        {
            let mut inner = self.shared.inner.lock();
            inner.exchange_cancel = None;
            inner.pairing_commands = None;
        }
        self.transition(ConnectionState::Disconnected);

        match &result {
            Ok(received) => {
                info!(peer_id, title = received.artifact.title(), "Exchange complete")
            }
            Err(err) => {
                warn!(peer_id, error = %err, "Exchange failed");
                self.report(Some(peer_id), err);
            }
        }
        result
    }

    async fn connect_with_retry(&self, peer_id: &str) -> ExchangeResult<Box<dyn PeerLink>> {
        let config = &self.shared.config;
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                config.connect_timeout,
                self.shared.radio.connect(peer_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExchangeError::ConnectTimeout),
            };

            match result {
                Ok(link) => return Ok(link),
                Err(err) if err.is_transient() && attempt < config.connect_retries => {
                    attempt += 1;
                    warn!(peer_id, attempt, error = %err, "Connect failed, retrying");
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn exchange_on_link(
        &self,
        link: &dyn PeerLink,
        artifact: &ExchangeArtifact,
        skip_pairing: bool,
    ) -> ExchangeResult<ReceivedArtifact> {
        let peer_id = link.peer_id().to_string();
        let attributes = link.discover_attributes(EXCHANGE_SERVICE_UUID).await?;
        if let Some(missing) = REQUIRED_ATTRIBUTES
            .iter()
            .find(|id| !attributes.contains(id))
        {
            return Err(ExchangeError::AttributeNotFound(missing.to_string()));
        }

        let sealed = self.shared.sealer.seal(artifact)?;

        let needs_pairing = self.shared.config.require_pairing
            && !skip_pairing
            && !self.shared.registry.contains(&peer_id);
        if needs_pairing {
            if !attributes.contains(&PAIRING_UUID) {
                return Err(ExchangeError::AttributeNotFound(PAIRING_UUID.to_string()));
            }
            self.run_pairing(link, &peer_id).await?;
        } else {
            debug!(peer_id = %peer_id, "Skipping pairing");
        }

        self.transition(ConnectionState::Exchanging);
        let mut incoming = link.subscribe(ARTIFACT_READ_UUID).await?;
        link.write(ARTIFACT_WRITE_UUID, sealed).await?;

        let value = match tokio::time::timeout(
            self.shared.config.exchange_timeout,
            incoming.recv(),
        )
        .await
        {
            Ok(Some(value)) => value,
            Ok(None) | Err(_) => {
                debug!(peer_id = %peer_id, "No artifact notification, reading directly");
                let value = link.read(ARTIFACT_READ_UUID).await?;
                if value.is_empty() {
                    return Err(ExchangeError::ExchangeTimeout);
                }
                value
            }
        };

        let received = self.shared.sealer.open(&value)?;
        Ok(ReceivedArtifact::new(
            &peer_id,
            received,
            ExchangeRole::Initiator,
        ))
    }

    async fn run_pairing(&self, link: &dyn PeerLink, peer_id: &str) -> ExchangeResult<()> {
        let config = &self.shared.config;
        let mut notes = link.subscribe(PAIRING_UUID).await?;
        let (commands_tx, mut commands) = mpsc::unbounded_channel();
        self.shared.inner.lock().pairing_commands = Some(commands_tx);

        let mut protocol = PairingProtocol::new(
            &config.device_id,
            config.secret.clone(),
            self.shared.registry.clone(),
        )
        .with_validity(config.code_validity)
        .with_updates(self.shared.pairing.clone());

        let session = protocol.initiate(peer_id, config.pairing_method)?;
        flush_outbound(link, &mut protocol).await?;
        info!(peer_id, method = %session.method, "Pairing started");
        let _ = self.shared.prompts.send(PairingPrompt::from_session(&session));

        let deadline = tokio::time::sleep(config.pairing_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Err(protocol.fail_timeout()),
                command = commands.recv() => {
                    let Some(PairingCommand { action, reply }) = command else {
                        return Err(protocol.fail_timeout());
                    };
                    let result = match action {
                        PairingAction::Confirm(matched) => protocol.confirm(matched),
                        PairingAction::Passkey(entered) => protocol.submit_passkey(&entered),
                    };
                    flush_outbound(link, &mut protocol).await?;
                    let _ = reply.send(result);
                }
                note = notes.recv() => {
                    let Some(bytes) = note else {
                        protocol.abandon(ExchangeError::Disconnected);
                        return Err(ExchangeError::Disconnected);
                    };
                    if let Err(err) = protocol.handle_incoming_confirmation(&bytes) {
                        debug!(peer_id, error = %err, "Pairing confirmation not accepted");
                    }
                    flush_outbound(link, &mut protocol).await?;
                }
            }

            match protocol.state() {
                PairingState::Paired => return Ok(()),
                PairingState::Failed(reason) => return Err(reason.clone()),
                _ => {}
            }
        }
    }
}

async fn flush_outbound(link: &dyn PeerLink, protocol: &mut PairingProtocol) -> ExchangeResult<()> {
    for message in protocol.drain_outbound() {
        link.write(PAIRING_UUID, message.to_bytes()?).await?;
    }
    Ok(())
}
