//! Scripted in-memory transport for testing.
//!
//! [`MockTransport`] records every request the core makes and, for
//! peripherals registered with a [`MockPeripheral`] script, answers them on
//! the event channel the way a real stack would. Tests can also inject any
//! [`TransportEvent`] by hand.
//!
//! # Features
//!
//! - **Call recording**: inspect the exact request sequence with [`MockTransport::calls`]
//! - **Scripted GATT**: services, characteristics, values and RSSI per peripheral
//! - **Failure injection**: failed connects, radio not ready, silent requests
//!
//! # Example
//!
//! ```
//! use blem_core::mock::{MockPeripheral, MockTransport, TransportCall};
//! use blem_core::transport::event_channel;
//! use blem_types::PeripheralId;
//!
//! let (tx, _rx) = event_channel();
//! let transport = MockTransport::builder(tx)
//!     .peripheral("AA:BB:CC:DD:EE:FF", MockPeripheral::new().rssi(-48))
//!     .build();
//!
//! use blem_core::transport::Transport;
//! transport.read_rssi(&PeripheralId::new("AA:BB:CC:DD:EE:FF"));
//! assert_eq!(transport.calls().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use uuid::Uuid;

use blem_types::{AdvertisementData, Characteristic, PeripheralId, RadioState};

use crate::error::TransportError;
use crate::transport::{
    DiscoveryBundle, PeripheralEvent, Transport, TransportEvent, TransportEventSender,
};

/// One request made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices {
        id: PeripheralId,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        id: PeripheralId,
        service: Uuid,
    },
    ReadValue {
        id: PeripheralId,
        characteristic: Uuid,
    },
    WriteValue {
        id: PeripheralId,
        characteristic: Uuid,
        data: Bytes,
        with_response: bool,
    },
    SetNotifyValue {
        id: PeripheralId,
        enabled: bool,
        characteristic: Uuid,
    },
    ReadRssi(PeripheralId),
    StartScan(Vec<Uuid>),
    StopScan,
}

/// Scripted GATT table for one peripheral.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    services: Vec<(Uuid, Vec<Characteristic>)>,
    values: HashMap<Uuid, Bytes>,
    rssi: i16,
    fail_connect: bool,
}

impl Default for MockPeripheral {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            values: HashMap::new(),
            rssi: -55,
            fail_connect: false,
        }
    }
}

impl MockPeripheral {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service with its characteristics.
    #[must_use]
    pub fn service(mut self, uuid: Uuid, characteristics: Vec<Characteristic>) -> Self {
        self.services.push((uuid, characteristics));
        self
    }

    /// Set the value returned when `characteristic` is read.
    #[must_use]
    pub fn value(mut self, characteristic: Uuid, value: impl Into<Bytes>) -> Self {
        self.values.insert(characteristic, value.into());
        self
    }

    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Answer connect requests with `FailedToConnect`.
    #[must_use]
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }
}

/// Builder for [`MockTransport`].
pub struct MockTransportBuilder {
    events: TransportEventSender,
    ready: bool,
    peripherals: HashMap<PeripheralId, MockPeripheral>,
}

impl MockTransportBuilder {
    /// Whether the radio reports ready (default `true`).
    #[must_use]
    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Script answers for one peripheral.
    #[must_use]
    pub fn peripheral(mut self, id: impl Into<PeripheralId>, peripheral: MockPeripheral) -> Self {
        self.peripherals.insert(id.into(), peripheral);
        self
    }

    #[must_use]
    pub fn build(self) -> MockTransport {
        MockTransport {
            events: self.events,
            ready: AtomicBool::new(self.ready),
            calls: Mutex::new(Vec::new()),
            peripherals: Mutex::new(self.peripherals),
        }
    }
}

/// In-memory [`Transport`].
///
/// Requests for peripherals without a script are only recorded.
pub struct MockTransport {
    events: TransportEventSender,
    ready: AtomicBool,
    calls: Mutex<Vec<TransportCall>>,
    peripherals: Mutex<HashMap<PeripheralId, MockPeripheral>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .field("calls", &self.calls().len())
            .finish()
    }
}

impl MockTransport {
    /// A ready transport with no scripted peripherals.
    pub fn new(events: TransportEventSender) -> Self {
        Self::builder(events).build()
    }

    pub fn builder(events: TransportEventSender) -> MockTransportBuilder {
        MockTransportBuilder {
            events,
            ready: true,
            peripherals: HashMap::new(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Script (or replace the script of) a peripheral.
    pub fn add_peripheral(&self, id: impl Into<PeripheralId>, peripheral: MockPeripheral) {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), peripheral);
    }

    /// Every request so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the recorded requests.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Count recorded requests matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    // --- Event injection ---

    pub fn emit(&self, event: TransportEvent) {
        // Ignore error if the central is gone
        let _ = self.events.send(event);
    }

    pub fn emit_peripheral(&self, id: impl Into<PeripheralId>, event: PeripheralEvent) {
        self.emit(TransportEvent::peripheral(id, event));
    }

    pub fn radio_state(&self, state: RadioState) {
        self.emit(TransportEvent::RadioStateUpdated(state));
    }

    /// Report a discovery with a name and advertised services.
    pub fn discover(&self, id: impl Into<PeripheralId>, name: Option<&str>, services: Vec<Uuid>, rssi: i16) {
        self.emit(TransportEvent::Discovered(DiscoveryBundle {
            peripheral_id: id.into(),
            advertisement: AdvertisementData {
                local_name: name.map(str::to_string),
                services,
                ..Default::default()
            },
            rssi: Some(rssi),
        }));
    }

    /// Push a notification value.
    pub fn notify(&self, id: impl Into<PeripheralId>, characteristic: Uuid, value: impl Into<Bytes>) {
        self.emit_peripheral(
            id,
            PeripheralEvent::ValueUpdated {
                characteristic,
                result: Ok(value.into()),
            },
        );
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn script(&self, id: &PeripheralId) -> Option<MockPeripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn find_characteristic(&self, id: &PeripheralId, uuid: &Uuid) -> bool {
        self.script(id).is_some_and(|p| {
            p.services
                .iter()
                .any(|(_, chars)| chars.iter().any(|c| c.uuid == *uuid))
        })
    }
}

impl Transport for MockTransport {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn connect(&self, id: &PeripheralId) {
        self.record(TransportCall::Connect(id.clone()));
        if let Some(script) = self.script(id) {
            if script.fail_connect {
                self.emit(TransportEvent::FailedToConnect {
                    id: id.clone(),
                    error: Some(TransportError::new("connection refused")),
                });
            } else {
                self.emit(TransportEvent::Connected(id.clone()));
            }
        }
    }

    fn disconnect(&self, id: &PeripheralId) {
        self.record(TransportCall::Disconnect(id.clone()));
        if self.script(id).is_some() {
            self.emit(TransportEvent::Disconnected {
                id: id.clone(),
                error: None,
            });
        }
    }

    fn discover_services(&self, id: &PeripheralId, services: &[Uuid]) {
        self.record(TransportCall::DiscoverServices {
            id: id.clone(),
            services: services.to_vec(),
        });
        if let Some(script) = self.script(id) {
            let found = script
                .services
                .iter()
                .map(|(uuid, _)| *uuid)
                .filter(|uuid| services.is_empty() || services.contains(uuid))
                .collect();
            self.emit_peripheral(id.clone(), PeripheralEvent::ServicesDiscovered(Ok(found)));
        }
    }

    fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) {
        self.record(TransportCall::DiscoverCharacteristics {
            id: id.clone(),
            service,
        });
        if let Some(script) = self.script(id) {
            let result = script
                .services
                .iter()
                .find(|(uuid, _)| *uuid == service)
                .map(|(_, chars)| chars.clone())
                .ok_or_else(|| TransportError::new("unknown service"));
            self.emit_peripheral(
                id.clone(),
                PeripheralEvent::CharacteristicsDiscovered { service, result },
            );
        }
    }

    fn read_value(&self, id: &PeripheralId, characteristic: &Characteristic) {
        self.record(TransportCall::ReadValue {
            id: id.clone(),
            characteristic: characteristic.uuid,
        });
        if let Some(script) = self.script(id) {
            let result = script
                .values
                .get(&characteristic.uuid)
                .cloned()
                .ok_or_else(|| TransportError::new("read not permitted"));
            self.emit_peripheral(
                id.clone(),
                PeripheralEvent::ValueUpdated {
                    characteristic: characteristic.uuid,
                    result,
                },
            );
        }
    }

    fn write_value(&self, id: &PeripheralId, characteristic: &Characteristic, data: Bytes, with_response: bool) {
        self.record(TransportCall::WriteValue {
            id: id.clone(),
            characteristic: characteristic.uuid,
            data: data.clone(),
            with_response,
        });
        if let Some(peripheral) = self
            .peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
        {
            peripheral.values.insert(characteristic.uuid, data);
        } else {
            return;
        }
        if with_response {
            self.emit_peripheral(
                id.clone(),
                PeripheralEvent::ValueWritten {
                    characteristic: characteristic.uuid,
                    result: Ok(()),
                },
            );
        }
    }

    fn set_notify_value(&self, id: &PeripheralId, enabled: bool, characteristic: &Characteristic) {
        self.record(TransportCall::SetNotifyValue {
            id: id.clone(),
            enabled,
            characteristic: characteristic.uuid,
        });
        if self.script(id).is_some() {
            let result = if self.find_characteristic(id, &characteristic.uuid) {
                Ok(enabled)
            } else {
                Err(TransportError::new("unknown characteristic"))
            };
            self.emit_peripheral(
                id.clone(),
                PeripheralEvent::NotificationStateUpdated {
                    characteristic: characteristic.uuid,
                    result,
                },
            );
        }
    }

    fn read_rssi(&self, id: &PeripheralId) {
        self.record(TransportCall::ReadRssi(id.clone()));
        if let Some(script) = self.script(id) {
            self.emit_peripheral(id.clone(), PeripheralEvent::RssiRead(Ok(script.rssi)));
        }
    }

    fn start_scan(&self, services: &[Uuid]) {
        self.record(TransportCall::StartScan(services.to_vec()));
    }

    fn stop_scan(&self) {
        self.record(TransportCall::StopScan);
    }
}

#[cfg(test)]
mod tests {
    use blem_types::{CharProperties, uuids};

    use super::*;
    use crate::transport::event_channel;

    fn battery_peripheral() -> MockPeripheral {
        MockPeripheral::new()
            .service(
                uuids::BATTERY_SERVICE,
                vec![Characteristic::new(
                    uuids::BATTERY_LEVEL,
                    uuids::BATTERY_SERVICE,
                    CharProperties::READ | CharProperties::NOTIFY,
                )],
            )
            .value(uuids::BATTERY_LEVEL, vec![91u8])
    }

    #[test]
    fn test_unscripted_requests_are_only_recorded() {
        let (tx, mut rx) = event_channel();
        let transport = MockTransport::new(tx);
        let id = PeripheralId::new("nobody");

        transport.connect(&id);
        transport.read_rssi(&id);
        transport.start_scan(&[uuids::BATTERY_SERVICE]);
        transport.stop_scan();

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Connect(id.clone()),
                TransportCall::ReadRssi(id),
                TransportCall::StartScan(vec![uuids::BATTERY_SERVICE]),
                TransportCall::StopScan,
            ]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scripted_peripheral_answers() {
        let (tx, mut rx) = event_channel();
        let transport = MockTransport::builder(tx)
            .peripheral("p1", battery_peripheral())
            .build();
        let id = PeripheralId::new("p1");

        transport.connect(&id);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connected(id.clone()));

        transport.discover_services(&id, &[uuids::BATTERY_SERVICE, uuids::HEART_RATE_SERVICE]);
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::peripheral(
                id.clone(),
                PeripheralEvent::ServicesDiscovered(Ok(vec![uuids::BATTERY_SERVICE]))
            )
        );

        let level = Characteristic::new(uuids::BATTERY_LEVEL, uuids::BATTERY_SERVICE, CharProperties::READ);
        transport.read_value(&id, &level);
        match rx.try_recv().unwrap() {
            TransportEvent::Peripheral {
                event: PeripheralEvent::ValueUpdated { result, .. },
                ..
            } => assert_eq!(result.unwrap().as_ref(), &[91]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_failed_connect_script() {
        let (tx, mut rx) = event_channel();
        let transport = MockTransport::builder(tx)
            .peripheral("p1", MockPeripheral::new().fail_connect())
            .build();

        transport.connect(&PeripheralId::new("p1"));

        assert!(matches!(rx.try_recv().unwrap(), TransportEvent::FailedToConnect { .. }));
    }

    #[test]
    fn test_write_updates_scripted_value() {
        let (tx, mut rx) = event_channel();
        let transport = MockTransport::builder(tx)
            .peripheral("p1", battery_peripheral())
            .build();
        let id = PeripheralId::new("p1");
        let level = Characteristic::new(uuids::BATTERY_LEVEL, uuids::BATTERY_SERVICE, CharProperties::READ);

        transport.write_value(&id, &level, Bytes::from_static(&[5]), false);
        assert!(rx.try_recv().is_err());

        transport.read_value(&id, &level);
        match rx.try_recv().unwrap() {
            TransportEvent::Peripheral {
                event: PeripheralEvent::ValueUpdated { result, .. },
                ..
            } => assert_eq!(result.unwrap().as_ref(), &[5]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_ready_flag_and_counting() {
        let (tx, _rx) = event_channel();
        let transport = MockTransport::builder(tx).ready(false).build();
        assert!(!transport.is_ready());
        transport.set_ready(true);
        assert!(transport.is_ready());

        transport.stop_scan();
        transport.stop_scan();
        assert_eq!(transport.count(|c| *c == TransportCall::StopScan), 2);
        assert_eq!(transport.take_calls().len(), 2);
        assert!(transport.calls().is_empty());
    }
}
