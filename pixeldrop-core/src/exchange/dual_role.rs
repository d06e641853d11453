// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Dual Role Orchestrator
//!
//! Runs the initiator and responder roles side by side so two devices that
//! both start exchanging meet regardless of who discovers whom first.
//! Artifacts from either role are merged into one stream with at-most-once
//! delivery per peer.
//!
//! The orchestrator owns the session-scoped caches: the paired-peer
//! registry, the in-flight link guard, the delivered-peer set, the
//! failed-peer set and the "peer nearby" notification dedup set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::artifact::{ArtifactSealer, ExchangeArtifact, JsonArtifactCodec, ReceivedArtifact};
use super::coordinator::ConnectionCoordinator;
use super::error::{ExchangeError, ExchangeResult};
use super::events::{PairingPrompt, EVENT_CHANNEL_CAPACITY};
use super::pairing::{ExchangeRole, PairingState};
use super::radio::{CentralRadio, ConnectionState, DiscoveredPeer, PeripheralRadio};
use super::registry::PairedPeerRegistry;
use super::responder::ResponderRoleAdapter;
use crate::config::{ExchangeConfig, ExchangeSettings};
use crate::crypto::PayloadCipher;
use crate::notify::NotificationSink;

/// How long stop waits for role tasks to wind down before aborting them.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct DualInner {
    running: bool,
    artifact: Option<ExchangeArtifact>,
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
    in_flight: HashSet<String>,
    delivered: HashSet<String>,
    notified: HashSet<String>,
    /// Peers whose last attempt ended in a non-transient failure.
    failed: HashSet<String>,
}

struct Shared {
    config: ExchangeConfig,
    coordinator: ConnectionCoordinator,
    responder: ResponderRoleAdapter,
    registry: PairedPeerRegistry,
    settings: Arc<dyn ExchangeSettings>,
    notifier: Arc<dyn NotificationSink>,
    received: broadcast::Sender<ReceivedArtifact>,
    prompts: broadcast::Sender<PairingPrompt>,
    inner: Mutex<DualInner>,
}

/// Both exchange roles under one start/stop pair.
#[derive(Clone)]
pub struct DualRoleOrchestrator {
    shared: Arc<Shared>,
}

impl DualRoleOrchestrator {
    /// Builds both roles on top of the given radio halves.
    pub fn new(
        config: ExchangeConfig,
        central: Arc<dyn CentralRadio>,
        peripheral: Arc<dyn PeripheralRadio>,
        settings: Arc<dyn ExchangeSettings>,
        notifier: Arc<dyn NotificationSink>,
    ) -> ExchangeResult<Self> {
        let cipher = PayloadCipher::new(&config.secret)
            .map_err(|e| ExchangeError::InvalidState(e.to_string()))?;
        let sealer = ArtifactSealer::new(cipher, Arc::new(JsonArtifactCodec));
        let registry = PairedPeerRegistry::new();

        let coordinator =
            ConnectionCoordinator::new(config.clone(), central, registry.clone(), sealer.clone());
        let responder = ResponderRoleAdapter::new(
            config.clone(),
            peripheral,
            registry.clone(),
            sealer,
        );

        Ok(DualRoleOrchestrator {
            shared: Arc::new(Shared {
                config,
                coordinator,
                responder,
                registry,
                settings,
                notifier,
                received: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                prompts: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                inner: Mutex::new(DualInner::default()),
            }),
        })
    }

    pub fn coordinator(&self) -> &ConnectionCoordinator {
        &self.shared.coordinator
    }

    pub fn responder(&self) -> &ResponderRoleAdapter {
        &self.shared.responder
    }

    pub fn registry(&self) -> &PairedPeerRegistry {
        &self.shared.registry
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().running
    }

    /// Merged received-artifact stream, at most one event per peer.
    pub fn subscribe_received(&self) -> broadcast::Receiver<ReceivedArtifact> {
        self.shared.received.subscribe()
    }

    /// Pairing prompts from both roles.
    pub fn subscribe_prompts(&self) -> broadcast::Receiver<PairingPrompt> {
        self.shared.prompts.subscribe()
    }

    /// Starts advertising and scanning.
    ///
    /// Fails with `PermissionDenied` when the user has not enabled
    /// background exchange. If scanning cannot start, advertising is
    /// stopped again before the error is returned.
    pub async fn start_dual_mode(
        &self,
        display_name: &str,
        artifact: ExchangeArtifact,
    ) -> ExchangeResult<()> {
        if !self.shared.settings.background_exchange_enabled() {
            warn!("Background exchange disabled in settings");
            return Err(ExchangeError::PermissionDenied);
        }
        {
            let mut inner = self.shared.inner.lock();
            if inner.running {
                return Err(ExchangeError::InvalidState("dual mode already running".into()));
            }
            inner.running = true;
        }

        let shared = &self.shared;
        shared
            .responder
            .set_address_rotation(shared.settings.address_rotation_enabled());

        let responder_received = shared.responder.subscribe_received();
        let responder_prompts = shared.responder.subscribe_prompts();
        let coordinator_prompts = shared.coordinator.subscribe_prompts();
        let discovery = shared.coordinator.subscribe_discovery();

        let started = async {
            shared
                .responder
                .start_advertising(display_name, artifact.clone())
                .await?;
            if let Err(err) = shared
                .coordinator
                .start_scanning(artifact.clone(), shared.config.scan_timeout)
                .await
            {
                let _ = shared.responder.stop_advertising().await;
                return Err(err);
            }
            Ok::<(), ExchangeError>(())
        }
        .await;

        if let Err(err) = started {
            self.shared.inner.lock().running = false;
            return Err(err);
        }

        let token = CancellationToken::new();
        let tasks = vec![
            self.spawn_received_forwarder(responder_received, token.clone()),
            self.spawn_prompt_forwarder(responder_prompts, token.clone()),
            self.spawn_prompt_forwarder(coordinator_prompts, token.clone()),
            self.spawn_discovery_loop(discovery, token.clone()),
        ];

        let mut inner = self.shared.inner.lock();
        inner.artifact = Some(artifact);
        inner.cancel = Some(token);
        inner.tasks = tasks;
        info!(device_id = %self.shared.config.device_id, "Dual mode started");
        Ok(())
    }

    /// Tears down both roles and all subscriptions.
    ///
    /// Both roles are always stopped; the first error encountered is
    /// returned afterwards. Idempotent.
    pub async fn stop_dual_mode(&self) -> ExchangeResult<()> {
        let (token, tasks) = {
            let mut inner = self.shared.inner.lock();
            if !inner.running {
                return Ok(());
            }
            inner.running = false;
            inner.artifact = None;
            inner.in_flight.clear();
            inner.notified.clear();
            inner.delivered.clear();
            inner.failed.clear();
            (inner.cancel.take(), std::mem::take(&mut inner.tasks))
        };

        if let Some(token) = token {
            token.cancel();
        }
        self.shared.coordinator.shutdown().await;
        let advertising = self.shared.responder.stop_advertising().await;
        for mut task in tasks {
            if tokio::time::timeout(TASK_DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }

        if let Err(err) = &advertising {
            warn!(error = %err, "Responder shutdown failed");
        }
        info!("Dual mode stopped");
        advertising
    }

    /// Connects to `peer_id` through the initiator role.
    ///
    /// Rejected with `InvalidState` if a connection to the same peer is
    /// already in flight. A successful exchange is published on the merged
    /// stream unless that peer was already delivered. After a pairing,
    /// decryption or other non-transient failure the peer is no longer
    /// dialled automatically until dual mode restarts.
    pub async fn connect_to(&self, peer_id: &str) -> ExchangeResult<ReceivedArtifact> {
        if !self.shared.inner.lock().in_flight.insert(peer_id.to_string()) {
            return Err(ExchangeError::InvalidState(format!(
                "connection to {peer_id} already in flight"
            )));
        }

        let result = self
            .shared
            .coordinator
            .connect_and_exchange(peer_id, false)
            .await;
        {
            let mut inner = self.shared.inner.lock();
            inner.in_flight.remove(peer_id);
            if let Err(err) = &result {
                if !err.is_transient() && !matches!(err, ExchangeError::InvalidState(_)) {
                    inner.failed.insert(peer_id.to_string());
                }
            }
        }

        match &result {
            Ok(received) => {
                self.deliver(received.clone());
            }
            Err(err) if err.is_pairing_failure() => {
                warn!(peer_id, error = %err, "Pairing failed, not retrying this peer");
            }
            Err(_) => {}
        }
        result
    }

    /// Routes an operator verdict to the role that raised `prompt`.
    pub async fn confirm_pairing(
        &self,
        prompt: &PairingPrompt,
        matched: bool,
    ) -> ExchangeResult<PairingState> {
        match prompt.role {
            ExchangeRole::Initiator => self.shared.coordinator.confirm_pairing(matched).await,
            ExchangeRole::Responder => {
                self.shared
                    .responder
                    .confirm_pairing(&prompt.peer_id, matched)
                    .await
            }
        }
    }

    /// Routes an operator-typed passkey to the role that raised `prompt`.
    pub async fn submit_passkey(
        &self,
        prompt: &PairingPrompt,
        entered: &str,
    ) -> ExchangeResult<PairingState> {
        match prompt.role {
            ExchangeRole::Initiator => self.shared.coordinator.submit_passkey(entered).await,
            ExchangeRole::Responder => {
                self.shared
                    .responder
                    .submit_passkey(&prompt.peer_id, entered)
                    .await
            }
        }
    }

    /// Publishes `received` unless its peer was already delivered.
    fn deliver(&self, received: ReceivedArtifact) -> bool {
        if !self
            .shared
            .inner
            .lock()
            .delivered
            .insert(received.peer_id.clone())
        {
            debug!(peer_id = %received.peer_id, via = ?received.via, "Duplicate artifact dropped");
            return false;
        }
        self.shared.notifier.artifact_received(&received);
        let _ = self.shared.received.send(received);
        true
    }

    fn should_connect(&self, peer: &DiscoveredPeer) -> bool {
        let (first_sighting, connect) = {
            let mut inner = self.shared.inner.lock();
            let first_sighting = inner.notified.insert(peer.peer_id.clone());
            let connect = inner.running
                && self.shared.config.auto_connect
                && !inner.delivered.contains(&peer.peer_id)
                && !inner.in_flight.contains(&peer.peer_id)
                && !inner.failed.contains(&peer.peer_id);
            (first_sighting, connect)
        };
        if first_sighting {
            self.shared.notifier.peer_nearby(peer);
        }
        connect
    }

    async fn resume_scanning(&self) {
        let artifact = {
            let inner = self.shared.inner.lock();
            if !inner.running {
                return;
            }
            inner.artifact.clone()
        };
        let Some(artifact) = artifact else {
            return;
        };
        if self.shared.coordinator.state() != ConnectionState::Disconnected {
            return;
        }
        if let Err(err) = self
            .shared
            .coordinator
            .start_scanning(artifact, self.shared.config.scan_timeout)
            .await
        {
            debug!(error = %err, "Could not resume scanning");
        }
    }

    fn spawn_discovery_loop(
        &self,
        mut discovery: broadcast::Receiver<DiscoveredPeer>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let peer = tokio::select! {
                    _ = token.cancelled() => break,
                    peer = discovery.recv() => match peer {
                        Ok(peer) => peer,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Discovery stream lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                if !this.should_connect(&peer) {
                    continue;
                }
                if this.shared.coordinator.state() != ConnectionState::Scanning {
                    continue;
                }

                match this.connect_to(&peer.peer_id).await {
                    Ok(_) => {}
                    Err(err) => debug!(peer_id = %peer.peer_id, error = %err, "Auto-connect failed"),
                }
                if token.is_cancelled() {
                    break;
                }
                this.resume_scanning().await;
            }
        })
    }

    fn spawn_received_forwarder(
        &self,
        mut received: broadcast::Receiver<ReceivedArtifact>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = received.recv() => match item {
                        Ok(item) => {
                            this.deliver(item);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Received-artifact stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn spawn_prompt_forwarder(
        &self,
        mut prompts: broadcast::Receiver<PairingPrompt>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let forward = self.shared.prompts.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = prompts.recv() => match item {
                        Ok(prompt) => {
                            let _ = forward.send(prompt);
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}
