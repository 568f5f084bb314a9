//! The transport seam between the core and a Bluetooth stack.
//!
//! A [`Transport`] issues requests and returns immediately. Every request is
//! answered later by a [`TransportEvent`] sent on the channel handed to the
//! transport at construction, the same way a platform delegate calls back.
//! The core never awaits a transport request directly; it only reacts to
//! events. [`BtleplugTransport`](crate::btle::BtleplugTransport) is the real
//! implementation and [`MockTransport`](crate::mock::MockTransport) the
//! scripted one used in tests.

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use blem_types::{AdvertisementData, Characteristic, PeripheralId, RadioState};

use crate::error::TransportError;

/// Result carried by a transport callback.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Requests the core issues against a Bluetooth stack.
///
/// All methods are fire-and-forget. Implementations must answer each request
/// with the matching [`TransportEvent`], including when it fails.
///
/// # Example
///
/// ```ignore
/// use blem_core::transport::{Transport, event_channel};
/// use blem_core::MockTransport;
///
/// let (tx, rx) = event_channel();
/// let transport = MockTransport::new(tx);
/// transport.start_scan(&[]);
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Whether the radio has finished initializing.
    ///
    /// Connect and disconnect requests made before this returns `true` are
    /// not forwarded; the device moves to `RadioUnavailable` instead.
    fn is_ready(&self) -> bool;

    // --- Connection Management ---

    /// Answered by `Connected` or `FailedToConnect`.
    fn connect(&self, id: &PeripheralId);

    /// Answered by `Disconnected`.
    fn disconnect(&self, id: &PeripheralId);

    // --- GATT ---

    /// Answered by [`PeripheralEvent::ServicesDiscovered`].
    fn discover_services(&self, id: &PeripheralId, services: &[Uuid]);

    /// Answered by [`PeripheralEvent::CharacteristicsDiscovered`].
    fn discover_characteristics(&self, id: &PeripheralId, service: Uuid);

    /// Answered by [`PeripheralEvent::ValueUpdated`].
    fn read_value(&self, id: &PeripheralId, characteristic: &Characteristic);

    /// Answered by [`PeripheralEvent::ValueWritten`] when `with_response` is set.
    fn write_value(
        &self,
        id: &PeripheralId,
        characteristic: &Characteristic,
        data: Bytes,
        with_response: bool,
    );

    /// Answered by [`PeripheralEvent::NotificationStateUpdated`]. Values
    /// pushed afterwards arrive as [`PeripheralEvent::ValueUpdated`].
    fn set_notify_value(&self, id: &PeripheralId, enabled: bool, characteristic: &Characteristic);

    /// Answered by [`PeripheralEvent::RssiRead`].
    fn read_rssi(&self, id: &PeripheralId);

    // --- Scanning ---

    /// Start scanning, filtered by `services` when non-empty.
    ///
    /// Duplicate advertisements are not requested. Each discovery arrives as
    /// [`TransportEvent::Discovered`]. There is no confirmation event.
    fn start_scan(&self, services: &[Uuid]);

    /// Stop scanning. There is no confirmation event.
    fn stop_scan(&self);
}

/// A raw discovery as reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryBundle {
    pub peripheral_id: PeripheralId,
    pub advertisement: AdvertisementData,
    pub rssi: Option<i16>,
}

/// Callbacks delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransportEvent {
    /// The radio power state changed.
    RadioStateUpdated(RadioState),
    /// A peripheral was seen while scanning.
    Discovered(DiscoveryBundle),
    Connected(PeripheralId),
    Disconnected {
        id: PeripheralId,
        error: Option<TransportError>,
    },
    FailedToConnect {
        id: PeripheralId,
        error: Option<TransportError>,
    },
    /// A callback scoped to one connected peripheral.
    Peripheral {
        id: PeripheralId,
        event: PeripheralEvent,
    },
}

impl TransportEvent {
    /// Convenience constructor for per-peripheral events.
    pub fn peripheral(id: impl Into<PeripheralId>, event: PeripheralEvent) -> Self {
        Self::Peripheral {
            id: id.into(),
            event,
        }
    }

    /// The peripheral this event is about, if any.
    pub fn peripheral_id(&self) -> Option<&PeripheralId> {
        match self {
            Self::RadioStateUpdated(_) => None,
            Self::Discovered(bundle) => Some(&bundle.peripheral_id),
            Self::Connected(id)
            | Self::Disconnected { id, .. }
            | Self::FailedToConnect { id, .. }
            | Self::Peripheral { id, .. } => Some(id),
        }
    }
}

/// Per-peripheral callbacks, one per request kind plus unsolicited updates.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PeripheralEvent {
    NameUpdated(String),
    /// Services the peripheral invalidated.
    ServicesModified(Vec<Uuid>),
    RssiRead(TransportResult<i16>),
    ServicesDiscovered(TransportResult<Vec<Uuid>>),
    IncludedServicesDiscovered {
        service: Uuid,
        result: TransportResult<Vec<Uuid>>,
    },
    CharacteristicsDiscovered {
        service: Uuid,
        result: TransportResult<Vec<Characteristic>>,
    },
    /// A read response or a notification push.
    ValueUpdated {
        characteristic: Uuid,
        result: TransportResult<Bytes>,
    },
    ValueWritten {
        characteristic: Uuid,
        result: TransportResult<()>,
    },
    NotificationStateUpdated {
        characteristic: Uuid,
        result: TransportResult<bool>,
    },
    DescriptorsDiscovered {
        characteristic: Uuid,
        result: TransportResult<Vec<Uuid>>,
    },
    DescriptorValueUpdated {
        descriptor: Uuid,
        result: TransportResult<Bytes>,
    },
    DescriptorValueWritten {
        descriptor: Uuid,
        result: TransportResult<()>,
    },
    ReadyToWriteWithoutResponse,
    /// An L2CAP channel opened; carries the PSM.
    L2capChannelOpened(TransportResult<u16>),
}

impl PeripheralEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NameUpdated(_) => "name_updated",
            Self::ServicesModified(_) => "services_modified",
            Self::RssiRead(_) => "rssi_read",
            Self::ServicesDiscovered(_) => "services_discovered",
            Self::IncludedServicesDiscovered { .. } => "included_services_discovered",
            Self::CharacteristicsDiscovered { .. } => "characteristics_discovered",
            Self::ValueUpdated { .. } => "value_updated",
            Self::ValueWritten { .. } => "value_written",
            Self::NotificationStateUpdated { .. } => "notification_state_updated",
            Self::DescriptorsDiscovered { .. } => "descriptors_discovered",
            Self::DescriptorValueUpdated { .. } => "descriptor_value_updated",
            Self::DescriptorValueWritten { .. } => "descriptor_value_written",
            Self::ReadyToWriteWithoutResponse => "ready_to_write_without_response",
            Self::L2capChannelOpened(_) => "l2cap_channel_opened",
        }
    }
}

/// Sender half handed to a transport.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half handed to a [`Central`](crate::Central).
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel a transport reports its callbacks on.
pub fn event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_routing_key() {
        let id = PeripheralId::new("AA:BB:CC:DD:EE:FF");
        let event = TransportEvent::peripheral(
            id.clone(),
            PeripheralEvent::RssiRead(Ok(-60)),
        );
        assert_eq!(event.peripheral_id(), Some(&id));
        assert_eq!(TransportEvent::RadioStateUpdated(RadioState::PoweredOn).peripheral_id(), None);
    }

    #[test]
    fn test_event_kind_names() {
        let event = PeripheralEvent::ValueUpdated {
            characteristic: Uuid::nil(),
            result: Err(TransportError::new("read failed")),
        };
        assert_eq!(event.kind(), "value_updated");
        assert_eq!(PeripheralEvent::ReadyToWriteWithoutResponse.kind(), "ready_to_write_without_response");
    }

    #[tokio::test]
    async fn test_event_channel_is_ordered() {
        let (tx, mut rx) = event_channel();
        tx.send(TransportEvent::Connected("a".into())).unwrap();
        tx.send(TransportEvent::Disconnected { id: "a".into(), error: None }).unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::Connected(_))));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Disconnected { .. })));
    }
}
