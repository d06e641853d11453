// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-Memory Radio
//!
//! A shared [`MockRadioMedium`] stands in for the air between devices. Each
//! simulated device gets a [`MockRadio`] that implements both the central and
//! the peripheral traits, so a single device can scan and advertise at once.
//!
//! Faults can be injected per device address: unavailable radio, denied
//! permission, failing or hanging connects, and hidden attributes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::{ExchangeError, ExchangeResult};
use super::radio::{
    Advertisement, AdvertisingParams, CentralRadio, PeerLink, PeripheralEvent, PeripheralRadio,
};

/// Default signal strength reported for simulated devices.
const DEFAULT_RSSI: i16 = -55;

/// Faults injected for one device address.
#[derive(Debug, Clone, Default)]
struct DeviceFaults {
    radio_unavailable: bool,
    permission_denied: bool,
    failing_connects: u32,
    unresponsive: bool,
    hidden_attributes: HashSet<Uuid>,
}

struct PeripheralSlot {
    address: String,
    params: AdvertisingParams,
    rssi: i16,
    events: Mutex<Option<mpsc::UnboundedSender<PeripheralEvent>>>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    subscribers: Mutex<HashMap<(String, Uuid), mpsc::UnboundedSender<Vec<u8>>>>,
    connected: Mutex<HashSet<String>>,
}

impl PeripheralSlot {
    fn advertisement(&self) -> Advertisement {
        Advertisement {
            peer_id: self.address.clone(),
            local_name: Some(self.params.local_name.clone()),
            service_uuids: vec![self.params.service_uuid],
            rssi: self.rssi,
        }
    }

    fn emit(&self, event: PeripheralEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn is_connected(&self, central: &str) -> bool {
        self.connected.lock().contains(central)
    }

    fn drop_central(&self, central: &str) -> bool {
        self.subscribers.lock().retain(|(peer, _), _| peer != central);
        self.connected.lock().remove(central)
    }
}

struct ScannerSlot {
    service: Uuid,
    tx: mpsc::UnboundedSender<Advertisement>,
}

#[derive(Default)]
struct MediumState {
    peripherals: HashMap<String, Arc<PeripheralSlot>>,
    scanners: HashMap<String, ScannerSlot>,
    faults: HashMap<String, DeviceFaults>,
    connect_attempts: HashMap<String, u32>,
}

/// Shared air joining every simulated device.
#[derive(Clone, Default)]
pub struct MockRadioMedium {
    state: Arc<Mutex<MediumState>>,
}

impl MockRadioMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the radio of a simulated device at `address`.
    pub fn radio(&self, address: &str) -> MockRadio {
        MockRadio {
            address: address.to_string(),
            medium: self.clone(),
        }
    }

    fn with_faults(&self, address: &str, f: impl FnOnce(&mut DeviceFaults)) {
        let mut state = self.state.lock();
        f(state.faults.entry(address.to_string()).or_default());
    }

    fn faults(&self, address: &str) -> DeviceFaults {
        self.state
            .lock()
            .faults
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every radio operation of `address` fail with `RadioUnavailable`.
    pub fn set_radio_unavailable(&self, address: &str, unavailable: bool) {
        self.with_faults(address, |f| f.radio_unavailable = unavailable);
    }

    /// Makes every radio operation of `address` fail with `PermissionDenied`.
    pub fn set_permission_denied(&self, address: &str, denied: bool) {
        self.with_faults(address, |f| f.permission_denied = denied);
    }

    /// The next `count` connects to `address` fail with `ConnectTimeout`.
    pub fn fail_next_connects(&self, address: &str, count: u32) {
        self.with_faults(address, |f| f.failing_connects = count);
    }

    /// Connects to `address` never complete.
    pub fn set_unresponsive(&self, address: &str, unresponsive: bool) {
        self.with_faults(address, |f| f.unresponsive = unresponsive);
    }

    /// Hides an attribute of `address` from attribute discovery.
    pub fn hide_attribute(&self, address: &str, attribute: Uuid) {
        self.with_faults(address, |f| {
            f.hidden_attributes.insert(attribute);
        });
    }

    /// Number of connect attempts made towards `address`.
    pub fn connect_attempts(&self, address: &str) -> u32 {
        self.state
            .lock()
            .connect_attempts
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Whether `address` is currently advertising.
    pub fn is_advertising(&self, address: &str) -> bool {
        self.state.lock().peripherals.contains_key(address)
    }

    /// Parameters `address` is currently advertising with.
    pub fn advertising_params(&self, address: &str) -> Option<AdvertisingParams> {
        self.state
            .lock()
            .peripherals
            .get(address)
            .map(|slot| slot.params.clone())
    }

    /// Whether `address` is currently scanning.
    pub fn is_scanning(&self, address: &str) -> bool {
        self.state.lock().scanners.contains_key(address)
    }

    /// Number of centrals connected to the peripheral at `address`.
    pub fn connected_centrals(&self, address: &str) -> usize {
        self.state
            .lock()
            .peripherals
            .get(address)
            .map(|slot| slot.connected.lock().len())
            .unwrap_or(0)
    }

    /// Re-emits the advertisement of `address` with a new signal strength.
    pub fn emit_sighting(&self, address: &str, rssi: i16) {
        let state = self.state.lock();
        let Some(slot) = state.peripherals.get(address) else {
            return;
        };
        let mut ad = slot.advertisement();
        ad.rssi = rssi;
        broadcast_advertisement(&state, &ad);
    }

    fn check_radio(&self, address: &str) -> ExchangeResult<()> {
        let faults = self.faults(address);
        if faults.radio_unavailable {
            return Err(ExchangeError::RadioUnavailable);
        }
        if faults.permission_denied {
            return Err(ExchangeError::PermissionDenied);
        }
        Ok(())
    }
}

fn broadcast_advertisement(state: &MediumState, ad: &Advertisement) {
    for (scanner, slot) in &state.scanners {
        if scanner != &ad.peer_id && ad.service_uuids.contains(&slot.service) {
            let _ = slot.tx.send(ad.clone());
        }
    }
}

/// Radio of one simulated device.
#[derive(Clone)]
pub struct MockRadio {
    address: String,
    medium: MockRadioMedium,
}

impl MockRadio {
    /// Address this radio uses both when scanning and advertising.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn own_slot(&self) -> ExchangeResult<Arc<PeripheralSlot>> {
        self.medium
            .state
            .lock()
            .peripherals
            .get(&self.address)
            .cloned()
            .ok_or_else(|| ExchangeError::InvalidState("not advertising".into()))
    }
}

/// Central-side link to a simulated peripheral.
pub struct MockLink {
    central: String,
    slot: Arc<PeripheralSlot>,
    hidden: HashSet<Uuid>,
    closed: AtomicBool,
}

impl MockLink {
    fn ensure_open(&self) -> ExchangeResult<()> {
        if self.closed.load(Ordering::SeqCst) || !self.slot.is_connected(&self.central) {
            return Err(ExchangeError::Disconnected);
        }
        Ok(())
    }

    fn ensure_exposed(&self, attribute: Uuid) -> ExchangeResult<()> {
        if !self.slot.params.attributes.contains(&attribute) || self.hidden.contains(&attribute) {
            return Err(ExchangeError::AttributeNotFound(attribute.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for MockLink {
    fn peer_id(&self) -> &str {
        &self.slot.address
    }

    async fn discover_attributes(&self, service: Uuid) -> ExchangeResult<Vec<Uuid>> {
        self.ensure_open()?;
        if service != self.slot.params.service_uuid {
            return Ok(Vec::new());
        }
        Ok(self
            .slot
            .params
            .attributes
            .iter()
            .filter(|a| !self.hidden.contains(a))
            .copied()
            .collect())
    }

    async fn write(&self, attribute: Uuid, value: Vec<u8>) -> ExchangeResult<()> {
        self.ensure_open()?;
        self.ensure_exposed(attribute)?;
        let delivered = self.slot.emit(PeripheralEvent::Write {
            peer_id: self.central.clone(),
            attribute,
            value,
        });
        if delivered {
            Ok(())
        } else {
            Err(ExchangeError::Disconnected)
        }
    }

    async fn read(&self, attribute: Uuid) -> ExchangeResult<Vec<u8>> {
        self.ensure_open()?;
        self.ensure_exposed(attribute)?;
        Ok(self
            .slot
            .values
            .lock()
            .get(&attribute)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe(&self, attribute: Uuid) -> ExchangeResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.ensure_open()?;
        self.ensure_exposed(attribute)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.slot
            .subscribers
            .lock()
            .insert((self.central.clone(), attribute), tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.slot.drop_central(&self.central) {
            self.slot.emit(PeripheralEvent::Disconnected {
                peer_id: self.central.clone(),
            });
        }
    }
}

#[async_trait]
impl CentralRadio for MockRadio {
    async fn start_scan(&self, service: Uuid) -> ExchangeResult<mpsc::UnboundedReceiver<Advertisement>> {
        self.medium.check_radio(&self.address)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.medium.state.lock();
        for (address, slot) in &state.peripherals {
            if address != &self.address && slot.params.service_uuid == service {
                let _ = tx.send(slot.advertisement());
            }
        }
        state
            .scanners
            .insert(self.address.clone(), ScannerSlot { service, tx });
        Ok(rx)
    }

    async fn stop_scan(&self) {
        self.medium.state.lock().scanners.remove(&self.address);
    }

    async fn connect(&self, peer_id: &str) -> ExchangeResult<Box<dyn PeerLink>> {
        self.medium.check_radio(&self.address)?;

        let target_faults = {
            let mut state = self.medium.state.lock();
            *state
                .connect_attempts
                .entry(peer_id.to_string())
                .or_default() += 1;
            let faults = state.faults.entry(peer_id.to_string()).or_default();
            if faults.failing_connects > 0 {
                faults.failing_connects -= 1;
                return Err(ExchangeError::ConnectTimeout);
            }
            faults.clone()
        };

        if target_faults.unresponsive {
            std::future::pending::<()>().await;
        }

        let slot = self
            .medium
            .state
            .lock()
            .peripherals
            .get(peer_id)
            .cloned()
            .ok_or(ExchangeError::Disconnected)?;

        slot.connected.lock().insert(self.address.clone());
        slot.emit(PeripheralEvent::Connected {
            peer_id: self.address.clone(),
        });

        Ok(Box::new(MockLink {
            central: self.address.clone(),
            slot,
            hidden: target_faults.hidden_attributes,
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl PeripheralRadio for MockRadio {
    async fn start_advertising(
        &self,
        params: AdvertisingParams,
    ) -> ExchangeResult<mpsc::UnboundedReceiver<PeripheralEvent>> {
        self.medium.check_radio(&self.address)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.medium.state.lock();
        if state.peripherals.contains_key(&self.address) {
            return Err(ExchangeError::InvalidState("already advertising".into()));
        }

        let slot = Arc::new(PeripheralSlot {
            address: self.address.clone(),
            params,
            rssi: DEFAULT_RSSI,
            events: Mutex::new(Some(tx)),
            values: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashSet::new()),
        });
        broadcast_advertisement(&state, &slot.advertisement());
        state.peripherals.insert(self.address.clone(), slot);
        Ok(rx)
    }

    async fn set_attribute_value(&self, attribute: Uuid, value: Vec<u8>) -> ExchangeResult<()> {
        self.own_slot()?.values.lock().insert(attribute, value);
        Ok(())
    }

    async fn notify(&self, peer_id: &str, attribute: Uuid, value: Vec<u8>) -> ExchangeResult<()> {
        let slot = self.own_slot()?;
        if !slot.is_connected(peer_id) {
            return Err(ExchangeError::Disconnected);
        }
        if let Some(tx) = slot
            .subscribers
            .lock()
            .get(&(peer_id.to_string(), attribute))
        {
            tx.send(value).map_err(|_| ExchangeError::Disconnected)?;
        }
        Ok(())
    }

    async fn disconnect_peer(&self, peer_id: &str) {
        if let Ok(slot) = self.own_slot() {
            if slot.drop_central(peer_id) {
                slot.emit(PeripheralEvent::Disconnected {
                    peer_id: peer_id.to_string(),
                });
            }
        }
    }

    async fn stop_advertising(&self) -> ExchangeResult<()> {
        let slot = self.medium.state.lock().peripherals.remove(&self.address);
        if let Some(slot) = slot {
            slot.subscribers.lock().clear();
            slot.connected.lock().clear();
            slot.events.lock().take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(attributes: Vec<Uuid>) -> AdvertisingParams {
        AdvertisingParams {
            local_name: "PD_Test".into(),
            service_uuid: Uuid::from_u128(1),
            attributes,
            rotate_address: false,
        }
    }

    #[tokio::test]
    async fn test_scanner_sees_existing_and_new_advertisers() {
        let medium = MockRadioMedium::new();
        let a = medium.radio("A");
        let b = medium.radio("B");
        let c = medium.radio("C");

        let _b_events = b.start_advertising(params(vec![])).await.unwrap();
        let mut scan = a.start_scan(Uuid::from_u128(1)).await.unwrap();
        let _c_events = c.start_advertising(params(vec![])).await.unwrap();

        let first = scan.recv().await.unwrap();
        let second = scan.recv().await.unwrap();
        assert_eq!(first.peer_id, "B");
        assert_eq!(second.peer_id, "C");
    }

    #[tokio::test]
    async fn test_write_reaches_peripheral_and_notify_reaches_central() {
        let medium = MockRadioMedium::new();
        let central = medium.radio("A");
        let peripheral = medium.radio("B");
        let attr = Uuid::from_u128(2);

        let mut events = peripheral.start_advertising(params(vec![attr])).await.unwrap();
        let link = central.connect("B").await.unwrap();
        let mut notes = link.subscribe(attr).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            PeripheralEvent::Connected { peer_id: "A".into() }
        );

        link.write(attr, b"ping".to_vec()).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            PeripheralEvent::Write { ref value, .. } if value == b"ping"
        ));

        peripheral.notify("A", attr, b"pong".to_vec()).await.unwrap();
        assert_eq!(notes.recv().await.unwrap(), b"pong".to_vec());
    }

    #[tokio::test]
    async fn test_stop_advertising_drops_links() {
        let medium = MockRadioMedium::new();
        let central = medium.radio("A");
        let peripheral = medium.radio("B");
        let attr = Uuid::from_u128(2);

        let _events = peripheral.start_advertising(params(vec![attr])).await.unwrap();
        let link = central.connect("B").await.unwrap();
        assert_eq!(medium.connected_centrals("B"), 1);

        peripheral.stop_advertising().await.unwrap();
        peripheral.stop_advertising().await.unwrap();

        assert!(!medium.is_advertising("B"));
        assert_eq!(link.write(attr, vec![1]).await, Err(ExchangeError::Disconnected));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let medium = MockRadioMedium::new();
        let a = medium.radio("A");
        let b = medium.radio("B");
        let _events = b.start_advertising(params(vec![Uuid::from_u128(2)])).await.unwrap();

        medium.fail_next_connects("B", 1);
        assert_eq!(a.connect("B").await.err(), Some(ExchangeError::ConnectTimeout));
        assert!(a.connect("B").await.is_ok());
        assert_eq!(medium.connect_attempts("B"), 2);

        medium.set_permission_denied("A", true);
        assert_eq!(
            a.start_scan(Uuid::from_u128(1)).await.err(),
            Some(ExchangeError::PermissionDenied)
        );
    }
}
