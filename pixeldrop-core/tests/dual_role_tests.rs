// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Dual Role Tests
//!
//! Two devices that both scan and advertise, racing to complete the same
//! exchange from both ends.

mod common;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;

use common::{fast_config, small_artifact};
use pixeldrop_core::crypto::AppSecret;
use pixeldrop_core::exchange::{DiscoveredPeer, ExchangeError, MockRadioMedium};
use pixeldrop_core::notify::RecordedNotification;
use pixeldrop_core::{
    ConnectionState, DualRoleOrchestrator, ExchangeConfig, NoopNotificationSink, NotificationSink,
    ReceivedArtifact, RecordingNotificationSink, StaticSettings,
};

const ALICE: &str = "AA:00:00:00:00:01";
const SAM: &str = "BB:00:00:00:00:02";
const WAIT: Duration = Duration::from_secs(5);

fn orchestrator(
    medium: &MockRadioMedium,
    address: &str,
    config: ExchangeConfig,
    settings: StaticSettings,
    sink: Arc<dyn NotificationSink>,
) -> DualRoleOrchestrator {
    let radio = Arc::new(medium.radio(address));
    DualRoleOrchestrator::new(config, radio.clone(), radio, Arc::new(settings), sink).unwrap()
}

fn device(medium: &MockRadioMedium, address: &str, device_id: &str) -> DualRoleOrchestrator {
    orchestrator(
        medium,
        address,
        fast_config(device_id),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    )
}

/// Confirms every pairing prompt as matching.
fn auto_confirm(orchestrator: &DualRoleOrchestrator) -> JoinHandle<()> {
    let orchestrator = orchestrator.clone();
    let mut prompts = orchestrator.subscribe_prompts();
    tokio::spawn(async move {
        while let Ok(prompt) = prompts.recv().await {
            let _ = orchestrator.confirm_pairing(&prompt, true).await;
        }
    })
}

#[tokio::test]
async fn test_both_devices_receive_exactly_one_artifact() {
    let medium = MockRadioMedium::new();
    let alice = device(&medium, ALICE, "alice");
    let sam = device(&medium, SAM, "sam");
    let _alice_confirm = auto_confirm(&alice);
    let _sam_confirm = auto_confirm(&sam);
    let mut alice_received = alice.subscribe_received();
    let mut sam_received = sam.subscribe_received();

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    sam.start_dual_mode("Sam", small_artifact("Sunset"))
        .await
        .unwrap();

    let at_alice = tokio::time::timeout(WAIT, alice_received.recv())
        .await
        .unwrap()
        .unwrap();
    let at_sam = tokio::time::timeout(WAIT, sam_received.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(at_alice.peer_id, SAM);
    assert_eq!(at_alice.artifact.title(), "Sunset");
    assert_eq!(at_sam.peer_id, ALICE);
    assert_eq!(at_sam.artifact.title(), "ABC");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(alice_received.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(sam_received.try_recv().unwrap_err(), TryRecvError::Empty);

    alice.stop_dual_mode().await.unwrap();
    sam.stop_dual_mode().await.unwrap();
}

#[tokio::test]
async fn test_manual_connect_guarded_against_duplicates() {
    let medium = MockRadioMedium::new();
    let manual = |id: &str| {
        fast_config(id)
            .with_pairing_required(false)
            .with_auto_connect(false)
    };
    let alice = orchestrator(
        &medium,
        ALICE,
        manual("alice"),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let sam = orchestrator(
        &medium,
        SAM,
        manual("sam"),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let mut alice_received = alice.subscribe_received();

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    sam.start_dual_mode("Sam", small_artifact("Sunset"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(alice.connect_to(SAM), alice.connect_to(SAM));

    assert_eq!(first.unwrap().artifact.title(), "Sunset");
    assert!(matches!(second, Err(ExchangeError::InvalidState(_))));
    assert_eq!(alice_received.recv().await.unwrap().peer_id, SAM);

    alice.stop_dual_mode().await.unwrap();
    sam.stop_dual_mode().await.unwrap();
}

#[tokio::test]
async fn test_disabled_background_exchange_refuses_to_start() {
    let medium = MockRadioMedium::new();
    let alice = orchestrator(
        &medium,
        ALICE,
        fast_config("alice"),
        StaticSettings {
            background_exchange: false,
            address_rotation: true,
        },
        Arc::new(NoopNotificationSink),
    );

    assert_eq!(
        alice.start_dual_mode("Alice", small_artifact("ABC")).await,
        Err(ExchangeError::PermissionDenied)
    );
    assert!(!alice.is_running());
    assert!(!medium.is_advertising(ALICE));
    assert!(!medium.is_scanning(ALICE));
}

#[tokio::test]
async fn test_address_rotation_preference_reaches_radio() {
    let medium = MockRadioMedium::new();
    let alice = orchestrator(
        &medium,
        ALICE,
        fast_config("alice"),
        StaticSettings {
            background_exchange: true,
            address_rotation: false,
        },
        Arc::new(NoopNotificationSink),
    );

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();

    let params = medium.advertising_params(ALICE).unwrap();
    assert!(!params.rotate_address);
    assert_eq!(params.local_name, "PD_Alice");

    alice.stop_dual_mode().await.unwrap();
}

#[tokio::test]
async fn test_radio_failure_leaves_nothing_running() {
    let medium = MockRadioMedium::new();
    medium.set_radio_unavailable(ALICE, true);
    let alice = device(&medium, ALICE, "alice");

    assert_eq!(
        alice.start_dual_mode("Alice", small_artifact("ABC")).await,
        Err(ExchangeError::RadioUnavailable)
    );
    assert!(!alice.is_running());
    assert!(!alice.responder().is_advertising());
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let medium = MockRadioMedium::new();
    let alice = device(&medium, ALICE, "alice");

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    assert!(matches!(
        alice.start_dual_mode("Alice", small_artifact("ABC")).await,
        Err(ExchangeError::InvalidState(_))
    ));

    alice.stop_dual_mode().await.unwrap();
}

#[tokio::test]
async fn test_stop_tears_down_both_roles() {
    let medium = MockRadioMedium::new();
    let alice = device(&medium, ALICE, "alice");

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    assert!(medium.is_advertising(ALICE));
    assert!(medium.is_scanning(ALICE));

    alice.stop_dual_mode().await.unwrap();
    alice.stop_dual_mode().await.unwrap();

    assert!(!alice.is_running());
    assert!(!medium.is_advertising(ALICE));
    assert!(!medium.is_scanning(ALICE));
    assert_eq!(
        alice.coordinator().state(),
        ConnectionState::Disconnected
    );

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    alice.stop_dual_mode().await.unwrap();
}

#[tokio::test]
async fn test_notifications_deduplicated_per_peer() {
    let medium = MockRadioMedium::new();
    let sink = RecordingNotificationSink::new();
    let alice = orchestrator(
        &medium,
        ALICE,
        fast_config("alice"),
        StaticSettings::default(),
        Arc::new(sink.clone()),
    );
    let sam = device(&medium, SAM, "sam");
    let _alice_confirm = auto_confirm(&alice);
    let _sam_confirm = auto_confirm(&sam);
    let mut alice_received = alice.subscribe_received();

    sam.start_dual_mode("Sam", small_artifact("Sunset"))
        .await
        .unwrap();
    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, alice_received.recv())
        .await
        .unwrap()
        .unwrap();
    medium.emit_sighting(SAM, -70);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let recorded = sink.recorded();
    let nearby = recorded
        .iter()
        .filter(|n| matches!(n, RecordedNotification::PeerNearby { .. }))
        .count();
    assert_eq!(nearby, 1);
    assert!(recorded.contains(&RecordedNotification::ArtifactReceived {
        peer_id: SAM.into(),
        title: "Sunset".into(),
    }));

    alice.stop_dual_mode().await.unwrap();
    sam.stop_dual_mode().await.unwrap();
}

#[tokio::test]
async fn test_exchange_from_both_ends_delivers_once_per_peer() {
    let medium = MockRadioMedium::new();
    let manual = |id: &str| {
        fast_config(id)
            .with_pairing_required(false)
            .with_auto_connect(false)
    };
    let alice = orchestrator(
        &medium,
        ALICE,
        manual("alice"),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let sam = orchestrator(
        &medium,
        SAM,
        manual("sam"),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let mut alice_received = alice.subscribe_received();
    let mut sam_received = sam.subscribe_received();

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    sam.start_dual_mode("Sam", small_artifact("Sunset"))
        .await
        .unwrap();

    let first = alice.connect_to(SAM).await.unwrap();
    let second = sam.connect_to(ALICE).await.unwrap();
    assert_eq!(first.artifact.title(), "Sunset");
    assert_eq!(second.artifact.title(), "ABC");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(alice_received.recv().await.unwrap().peer_id, SAM);
    assert_eq!(sam_received.recv().await.unwrap().peer_id, ALICE);
    assert_eq!(alice_received.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(sam_received.try_recv().unwrap_err(), TryRecvError::Empty);

    alice.stop_dual_mode().await.unwrap();
    sam.stop_dual_mode().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_peer_not_dialled_again() {
    let medium = MockRadioMedium::new();
    let alice = orchestrator(
        &medium,
        ALICE,
        fast_config("alice").with_pairing_required(false),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let sam = orchestrator(
        &medium,
        SAM,
        fast_config("sam")
            .with_pairing_required(false)
            .with_secret(AppSecret::from_passphrase("other build")),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let mut alice_received = alice.subscribe_received();

    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();
    sam.start_dual_mode("Sam", small_artifact("Sunset"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(medium.connect_attempts(SAM), 1);
    assert_eq!(medium.connect_attempts(ALICE), 1);
    assert_eq!(alice_received.try_recv().unwrap_err(), TryRecvError::Empty);

    alice.stop_dual_mode().await.unwrap();
    sam.stop_dual_mode().await.unwrap();
}

/// Asks the orchestrator for its state from inside the callback.
#[derive(Default)]
struct QueryingSink {
    orchestrator: OnceLock<DualRoleOrchestrator>,
    answers: parking_lot::Mutex<Vec<bool>>,
}

impl NotificationSink for QueryingSink {
    fn peer_nearby(&self, _peer: &DiscoveredPeer) {
        if let Some(orchestrator) = self.orchestrator.get() {
            self.answers.lock().push(orchestrator.is_running());
        }
    }

    fn artifact_received(&self, _received: &ReceivedArtifact) {
        if let Some(orchestrator) = self.orchestrator.get() {
            self.answers.lock().push(orchestrator.is_running());
        }
    }
}

#[tokio::test]
async fn test_sink_may_call_back_into_orchestrator() {
    let medium = MockRadioMedium::new();
    let sink = Arc::new(QueryingSink::default());
    let alice = orchestrator(
        &medium,
        ALICE,
        fast_config("alice").with_pairing_required(false),
        StaticSettings::default(),
        sink.clone(),
    );
    let _ = sink.orchestrator.set(alice.clone());
    let sam = orchestrator(
        &medium,
        SAM,
        fast_config("sam").with_pairing_required(false),
        StaticSettings::default(),
        Arc::new(NoopNotificationSink),
    );
    let mut alice_received = alice.subscribe_received();

    sam.start_dual_mode("Sam", small_artifact("Sunset"))
        .await
        .unwrap();
    alice
        .start_dual_mode("Alice", small_artifact("ABC"))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, alice_received.recv())
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let answers = sink.answers.lock().clone();
    assert!(answers.len() >= 2);
    assert!(answers.iter().all(|running| *running));

    alice.stop_dual_mode().await.unwrap();
    sam.stop_dual_mode().await.unwrap();
}
