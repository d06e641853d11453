// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Radio Layer Abstraction
//!
//! Platform-agnostic interface to the advertising/scanning radio and its
//! attribute server. Platform code (CoreBluetooth, Android BLE, BlueZ)
//! implements these traits; [`super::MockRadio`] implements them in memory
//! for tests and the CLI simulator.
//!
//! The central side (scanner/initiator) uses [`CentralRadio`] and
//! [`PeerLink`]; the peripheral side (advertiser/responder) uses
//! [`PeripheralRadio`] and consumes [`PeripheralEvent`]s.

use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::ExchangeResult;
use super::schema::decode_advertised_name;

/// A single advertisement sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Radio-layer address of the advertiser.
    pub peer_id: String,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Service identifiers carried in the advertisement.
    pub service_uuids: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// What the peripheral role puts on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParams {
    pub local_name: String,
    pub service_uuid: Uuid,
    /// Attributes exposed by the attribute server.
    pub attributes: Vec<Uuid>,
    /// Use a rotating private address while advertising.
    pub rotate_address: bool,
}

/// A peer seen during discovery.
///
/// Repeated sightings overwrite the previous entry; nothing is merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Radio-layer address, not stable across sessions.
    pub peer_id: String,
    /// Display name decoded from the advertised name.
    pub display_name: Option<String>,
    /// When the latest sighting arrived.
    pub observed_at: Instant,
    /// Signal strength in dBm.
    pub signal_strength: i16,
}

impl DiscoveredPeer {
    /// Builds a peer from an advertisement observed at `observed_at`.
    pub fn from_advertisement(ad: &Advertisement, observed_at: Instant) -> Self {
        DiscoveredPeer {
            peer_id: ad.peer_id.clone(),
            display_name: ad.local_name.as_deref().and_then(decode_advertised_name),
            observed_at,
            signal_strength: ad.rssi,
        }
    }
}

/// Machine-wide connection state of the initiator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Exchanging,
}

impl ConnectionState {
    /// Allowed transitions. `Connected` is reachable only via `Connecting`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Scanning)
                | (Disconnected, Connecting)
                | (Scanning, Connecting)
                | (Connecting, Connected)
                | (Connected, Exchanging)
                | (_, Disconnected)
        )
    }
}

/// Events delivered to the peripheral role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// A central connected.
    Connected { peer_id: String },
    /// A central wrote to one of our attributes.
    Write {
        peer_id: String,
        attribute: Uuid,
        value: Vec<u8>,
    },
    /// A central went away.
    Disconnected { peer_id: String },
}

/// An open link from the central to one peripheral.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Address of the connected peer.
    fn peer_id(&self) -> &str;

    /// Lists the attributes the peer exposes under `service`.
    async fn discover_attributes(&self, service: Uuid) -> ExchangeResult<Vec<Uuid>>;

    /// Writes a value (with response) to a peer attribute.
    async fn write(&self, attribute: Uuid, value: Vec<u8>) -> ExchangeResult<()>;

    /// Reads the current value of a peer attribute.
    async fn read(&self, attribute: Uuid) -> ExchangeResult<Vec<u8>>;

    /// Subscribes to notifications on a peer attribute.
    async fn subscribe(&self, attribute: Uuid) -> ExchangeResult<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Closes the link. Safe to call more than once.
    async fn disconnect(&self);
}

/// Scanner/initiator half of the radio.
#[async_trait]
pub trait CentralRadio: Send + Sync {
    /// Starts scanning for advertisements carrying `service`.
    ///
    /// Fails with `RadioUnavailable` or `PermissionDenied` when the radio
    /// cannot scan.
    async fn start_scan(&self, service: Uuid) -> ExchangeResult<mpsc::UnboundedReceiver<Advertisement>>;

    /// Stops scanning. Idempotent.
    async fn stop_scan(&self);

    /// Opens a link to an advertising peer.
    ///
    /// Implementations may block indefinitely; callers bound it with a
    /// timeout.
    async fn connect(&self, peer_id: &str) -> ExchangeResult<Box<dyn PeerLink>>;
}

/// Advertiser/responder half of the radio.
#[async_trait]
pub trait PeripheralRadio: Send + Sync {
    /// Starts advertising and serving attributes.
    async fn start_advertising(
        &self,
        params: AdvertisingParams,
    ) -> ExchangeResult<mpsc::UnboundedReceiver<PeripheralEvent>>;

    /// Sets the value returned for reads of `attribute`.
    async fn set_attribute_value(&self, attribute: Uuid, value: Vec<u8>) -> ExchangeResult<()>;

    /// Sends a notification on `attribute` to one connected central.
    async fn notify(&self, peer_id: &str, attribute: Uuid, value: Vec<u8>) -> ExchangeResult<()>;

    /// Drops one connected central.
    async fn disconnect_peer(&self, peer_id: &str);

    /// Stops advertising and drops every connected central. Idempotent.
    async fn stop_advertising(&self) -> ExchangeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_connected_requires_connecting() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Scanning.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Connected));
    }

    #[test]
    fn test_every_state_can_disconnect() {
        for state in [Disconnected, Scanning, Connecting, Connected, Exchanging] {
            assert!(state.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn test_exchanging_only_from_connected() {
        assert!(Connected.can_transition_to(Exchanging));
        assert!(!Connecting.can_transition_to(Exchanging));
        assert!(!Scanning.can_transition_to(Exchanging));
    }

    #[test]
    fn test_discovered_peer_decodes_name() {
        let ad = Advertisement {
            peer_id: "AA:01".into(),
            local_name: Some("PD_Sam".into()),
            service_uuids: vec![],
            rssi: -60,
        };
        let peer = DiscoveredPeer::from_advertisement(&ad, Instant::now());

        assert_eq!(peer.display_name.as_deref(), Some("Sam"));
        assert_eq!(peer.signal_strength, -60);
    }
}
