// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Notification Sink
//!
//! Presentation of "peer nearby" and "artifact received" notifications is
//! owned by the host; this module only defines the seam.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::exchange::{DiscoveredPeer, ReceivedArtifact};

/// Receives user-facing notifications from the exchange subsystem.
pub trait NotificationSink: Send + Sync {
    /// A new peer came into range.
    fn peer_nearby(&self, peer: &DiscoveredPeer);

    /// An artifact arrived from a peer.
    fn artifact_received(&self, received: &ReceivedArtifact);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn peer_nearby(&self, _peer: &DiscoveredPeer) {}

    fn artifact_received(&self, _received: &ReceivedArtifact) {}
}

/// Notification captured by [`RecordingNotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedNotification {
    PeerNearby { peer_id: String },
    ArtifactReceived { peer_id: String, title: String },
}

/// Keeps every notification in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotificationSink {
    recorded: Arc<Mutex<Vec<RecordedNotification>>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<RecordedNotification> {
        self.recorded.lock().clone()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn peer_nearby(&self, peer: &DiscoveredPeer) {
        self.recorded.lock().push(RecordedNotification::PeerNearby {
            peer_id: peer.peer_id.clone(),
        });
    }

    fn artifact_received(&self, received: &ReceivedArtifact) {
        self.recorded
            .lock()
            .push(RecordedNotification::ArtifactReceived {
                peer_id: received.peer_id.clone(),
                title: received.artifact.title().to_string(),
            });
    }
}
