//! [`Transport`] over btleplug.
//!
//! btleplug exposes async calls per peripheral and one event stream per
//! adapter. This adapter runs each request as a task on the runtime it was
//! created on and reports the outcome as a [`TransportEvent`], so the core
//! sees the same callback surface as on any other platform.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use btleplug::api::{
    Central as _, CentralEvent, CentralState, CharPropFlags, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blem_types::{AdvertisementData, CharProperties, Characteristic, PeripheralId, RadioState};

use crate::error::{Error, Result, TransportError};
use crate::transport::{
    DiscoveryBundle, PeripheralEvent, Transport, TransportEvent, TransportEventSender, TransportResult,
};
use crate::util::{create_identifier, format_peripheral_id};

type PlatformId = btleplug::platform::PeripheralId;

#[derive(Default)]
struct Known {
    peripherals: HashMap<PeripheralId, Peripheral>,
    ids: HashMap<PlatformId, PeripheralId>,
}

/// Transport backed by the first Bluetooth adapter btleplug finds.
pub struct BtleplugTransport {
    adapter: Adapter,
    events: TransportEventSender,
    runtime: Handle,
    known: Arc<Mutex<Known>>,
    ready: Arc<AtomicBool>,
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

impl BtleplugTransport {
    /// Open the adapter and start forwarding its events to `events`.
    pub async fn new(events: TransportEventSender) -> Result<Self> {
        let adapter = get_adapter().await?;
        let stream = adapter.events().await?;
        let initial = match adapter.adapter_state().await {
            Ok(state) => radio_state_from(state),
            Err(e) => {
                warn!("Adapter state unavailable, assuming powered on: {}", e);
                RadioState::PoweredOn
            }
        };

        let transport = Self {
            adapter,
            events,
            runtime: Handle::current(),
            known: Arc::new(Mutex::new(Known::default())),
            ready: Arc::new(AtomicBool::new(false)),
        };
        report_radio_state(&transport.ready, &transport.events, initial);
        transport.runtime.spawn(forward_adapter_events(
            transport.adapter.clone(),
            stream,
            transport.known.clone(),
            transport.ready.clone(),
            transport.events.clone(),
        ));

        info!(radio = %initial, "Bluetooth adapter opened");
        Ok(transport)
    }

    fn peripheral(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peripherals
            .get(id)
            .cloned()
    }

    /// Run `request` against a known peripheral and report its event.
    fn with_peripheral<F, Fut>(&self, id: &PeripheralId, request: &'static str, f: F)
    where
        F: FnOnce(Peripheral) -> Fut + Send + 'static,
        Fut: Future<Output = Option<PeripheralEvent>> + Send + 'static,
    {
        let Some(peripheral) = self.peripheral(id) else {
            warn!(peripheral = %id, request, "Request for unknown peripheral");
            return;
        };
        let id = id.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Some(event) = f(peripheral).await {
                let _ = events.send(TransportEvent::peripheral(id, event));
            }
        });
    }
}

async fn forward_adapter_events(
    adapter: Adapter,
    mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    known: Arc<Mutex<Known>>,
    ready: Arc<AtomicBool>,
    events: TransportEventSender,
) {
    while let Some(event) = stream.next().await {
        match event {
            CentralEvent::DeviceDiscovered(platform_id) | CentralEvent::DeviceUpdated(platform_id) => {
                let Ok(peripheral) = adapter.peripheral(&platform_id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let id = create_identifier(
                    &properties.address.to_string(),
                    &format_peripheral_id(&platform_id),
                );
                {
                    let mut known = known.lock().unwrap_or_else(PoisonError::into_inner);
                    known.ids.insert(platform_id, id.clone());
                    known.peripherals.insert(id.clone(), peripheral);
                }
                let bundle = DiscoveryBundle {
                    peripheral_id: id,
                    rssi: properties.rssi,
                    advertisement: advertisement_from(&properties),
                };
                if events.send(TransportEvent::Discovered(bundle)).is_err() {
                    break;
                }
            }
            CentralEvent::DeviceDisconnected(platform_id) => {
                let id = known
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .ids
                    .get(&platform_id)
                    .cloned();
                if let Some(id) = id {
                    debug!(peripheral = %id, "Adapter reported disconnect");
                    let _ = events.send(TransportEvent::Disconnected { id, error: None });
                }
            }
            CentralEvent::StateUpdate(state) => {
                let state = radio_state_from(state);
                debug!(radio = %state, "Adapter state changed");
                report_radio_state(&ready, &events, state);
            }
            _ => {}
        }
    }
    debug!("Adapter event stream ended");
}

fn radio_state_from(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

/// Readiness is updated before the core sees the new state.
fn report_radio_state(ready: &AtomicBool, events: &TransportEventSender, state: RadioState) {
    ready.store(state.is_powered_on(), Ordering::Relaxed);
    let _ = events.send(TransportEvent::RadioStateUpdated(state));
}

fn advertisement_from(properties: &PeripheralProperties) -> AdvertisementData {
    AdvertisementData {
        local_name: properties.local_name.clone(),
        manufacturer_data: properties.manufacturer_data.clone(),
        service_data: properties.service_data.clone(),
        services: properties.services.clone(),
        tx_power_level: properties.tx_power_level,
    }
}

fn char_properties(flags: CharPropFlags) -> CharProperties {
    CharProperties::from_bits(flags.bits())
}

fn characteristic_from(characteristic: &btleplug::api::Characteristic) -> Characteristic {
    Characteristic::new(
        characteristic.uuid,
        characteristic.service_uuid,
        char_properties(characteristic.properties),
    )
}

/// The platform characteristic matching `characteristic`.
fn find_platform_characteristic(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
) -> TransportResult<btleplug::api::Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
        .ok_or_else(|| TransportError::new(format!("characteristic {} not discovered", characteristic.uuid)))
}

impl Transport for BtleplugTransport {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn connect(&self, id: &PeripheralId) {
        let Some(peripheral) = self.peripheral(id) else {
            let _ = self.events.send(TransportEvent::FailedToConnect {
                id: id.clone(),
                error: Some(TransportError::new("peripheral was never discovered")),
            });
            return;
        };
        let id = id.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.connect().await {
                let _ = events.send(TransportEvent::FailedToConnect {
                    id,
                    error: Some(e.into()),
                });
                return;
            }

            match peripheral.notifications().await {
                Ok(mut notifications) => {
                    let forward = events.clone();
                    let notify_id = id.clone();
                    tokio::spawn(async move {
                        while let Some(notification) = notifications.next().await {
                            let event = PeripheralEvent::ValueUpdated {
                                characteristic: notification.uuid,
                                result: Ok(Bytes::from(notification.value)),
                            };
                            if forward.send(TransportEvent::peripheral(notify_id.clone(), event)).is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => warn!(peripheral = %id, "Notification stream unavailable: {}", e),
            }

            let _ = events.send(TransportEvent::Connected(id));
        });
    }

    fn disconnect(&self, id: &PeripheralId) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };
        let id = id.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let error = peripheral.disconnect().await.err().map(TransportError::from);
            let _ = events.send(TransportEvent::Disconnected { id, error });
        });
    }

    fn discover_services(&self, id: &PeripheralId, services: &[Uuid]) {
        let wanted = services.to_vec();
        self.with_peripheral(id, "discover_services", move |peripheral| async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .into_iter()
                    .map(|service| service.uuid)
                    .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
                    .collect()),
                Err(e) => Err(e.into()),
            };
            Some(PeripheralEvent::ServicesDiscovered(result))
        });
    }

    fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) {
        self.with_peripheral(id, "discover_characteristics", move |peripheral| async move {
            let result = peripheral
                .services()
                .into_iter()
                .find(|s| s.uuid == service)
                .map(|s| s.characteristics.iter().map(characteristic_from).collect())
                .ok_or_else(|| TransportError::new(format!("service {} not discovered", service)));
            Some(PeripheralEvent::CharacteristicsDiscovered { service, result })
        });
    }

    fn read_value(&self, id: &PeripheralId, characteristic: &Characteristic) {
        let characteristic = characteristic.clone();
        self.with_peripheral(id, "read_value", move |peripheral| async move {
            let result = match find_platform_characteristic(&peripheral, &characteristic) {
                Ok(platform) => peripheral
                    .read(&platform)
                    .await
                    .map(Bytes::from)
                    .map_err(TransportError::from),
                Err(e) => Err(e),
            };
            Some(PeripheralEvent::ValueUpdated {
                characteristic: characteristic.uuid,
                result,
            })
        });
    }

    fn write_value(&self, id: &PeripheralId, characteristic: &Characteristic, data: Bytes, with_response: bool) {
        let characteristic = characteristic.clone();
        self.with_peripheral(id, "write_value", move |peripheral| async move {
            let write_type = if with_response {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            };
            let result = match find_platform_characteristic(&peripheral, &characteristic) {
                Ok(platform) => peripheral
                    .write(&platform, &data, write_type)
                    .await
                    .map_err(TransportError::from),
                Err(e) => Err(e),
            };
            if with_response {
                Some(PeripheralEvent::ValueWritten {
                    characteristic: characteristic.uuid,
                    result,
                })
            } else {
                if let Err(e) = result {
                    warn!(characteristic = %characteristic.uuid, "Write without response failed: {}", e);
                }
                None
            }
        });
    }

    fn set_notify_value(&self, id: &PeripheralId, enabled: bool, characteristic: &Characteristic) {
        let characteristic = characteristic.clone();
        self.with_peripheral(id, "set_notify_value", move |peripheral| async move {
            let result = match find_platform_characteristic(&peripheral, &characteristic) {
                Ok(platform) if enabled => peripheral.subscribe(&platform).await,
                Ok(platform) => peripheral.unsubscribe(&platform).await,
                Err(e) => {
                    return Some(PeripheralEvent::NotificationStateUpdated {
                        characteristic: characteristic.uuid,
                        result: Err(e),
                    });
                }
            };
            Some(PeripheralEvent::NotificationStateUpdated {
                characteristic: characteristic.uuid,
                result: result.map(|()| enabled).map_err(TransportError::from),
            })
        });
    }

    fn read_rssi(&self, id: &PeripheralId) {
        self.with_peripheral(id, "read_rssi", |peripheral| async move {
            let result = match peripheral.properties().await {
                Ok(Some(PeripheralProperties { rssi: Some(rssi), .. })) => Ok(rssi),
                Ok(_) => Err(TransportError::new("RSSI unavailable")),
                Err(e) => Err(e.into()),
            };
            Some(PeripheralEvent::RssiRead(result))
        });
    }

    fn start_scan(&self, services: &[Uuid]) {
        let adapter = self.adapter.clone();
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("Failed to start scan: {}", e);
            }
        });
    }

    fn stop_scan(&self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop scan: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_properties_match_flag_bits() {
        let props = char_properties(CharPropFlags::READ | CharPropFlags::NOTIFY);
        assert!(props.contains(CharProperties::READ));
        assert!(props.contains(CharProperties::NOTIFY));
        assert!(!props.contains(CharProperties::WRITE));
        assert!(props.can_subscribe());

        let props = char_properties(CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::INDICATE);
        assert!(props.contains(CharProperties::WRITE_WITHOUT_RESPONSE));
        assert!(props.contains(CharProperties::INDICATE));
    }

    #[test]
    fn test_radio_state_from_adapter_state() {
        assert_eq!(radio_state_from(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state_from(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state_from(CentralState::Unknown), RadioState::Unknown);
    }

    #[test]
    fn test_report_radio_state_tracks_readiness() {
        let (tx, mut rx) = crate::transport::event_channel();
        let ready = AtomicBool::new(false);

        report_radio_state(&ready, &tx, RadioState::PoweredOn);
        assert!(ready.load(Ordering::Relaxed));
        report_radio_state(&ready, &tx, RadioState::PoweredOff);
        assert!(!ready.load(Ordering::Relaxed));

        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::RadioStateUpdated(RadioState::PoweredOn))
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::RadioStateUpdated(RadioState::PoweredOff))
        ));
    }

    #[test]
    fn test_all_flags_map() {
        assert_eq!(char_properties(CharPropFlags::all()).bits(), 0xff);
        assert_eq!(char_properties(CharPropFlags::empty()), CharProperties::empty());
    }
}
