//! The operation contract.
//!
//! An [`Operation`] is one multi-step exchange with a peripheral. It is
//! started when it reaches the head of its device's queue, receives the
//! transport callbacks that arrive while it is the head, and leaves the queue
//! when `start` or a handler returns [`OpResponse::Complete`]. If the
//! connection goes away first, `abort` is called instead, exactly once.
//!
//! Every handler has a default that returns [`OpResponse::InProgress`], so an
//! operation only overrides the callbacks it waits for.
//!
//! # Example
//!
//! ```
//! use blem_core::operation::{OpContext, OpResponse, Operation};
//! use blem_core::transport::TransportResult;
//! use blem_types::AbortReason;
//!
//! /// Reads the signal strength and discards it.
//! struct PingOp;
//!
//! impl Operation for PingOp {
//!     fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
//!         ctx.transport().read_rssi(ctx.peripheral_id());
//!         OpResponse::InProgress
//!     }
//!
//!     fn abort(self: Box<Self>, _reason: AbortReason) {}
//!
//!     fn on_rssi_read(&mut self, _ctx: &mut OpContext<'_>, _result: &TransportResult<i16>) -> OpResponse {
//!         OpResponse::Complete
//!     }
//! }
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use uuid::Uuid;

use blem_types::{AbortReason, Characteristic, PeripheralId};

use crate::device::DeviceInfo;
use crate::transport::{PeripheralEvent, Transport, TransportResult};

/// What an operation reports after `start` or a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResponse {
    /// Keep this operation at the head of the queue.
    InProgress,
    /// Pop this operation and start the next one.
    Complete,
}

/// Device state an operation may use while it is the head of the queue.
pub struct OpContext<'a> {
    pub(crate) peripheral_id: &'a PeripheralId,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) characteristics: &'a mut Vec<Characteristic>,
    pub(crate) auto_discover: &'a [Uuid],
    pub(crate) info: &'a Arc<RwLock<DeviceInfo>>,
}

impl<'a> OpContext<'a> {
    pub fn peripheral_id(&self) -> &PeripheralId {
        self.peripheral_id
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport
    }

    /// Look up a characteristic in the device's cache.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid).cloned()
    }

    /// Characteristics discovered on the current connection.
    pub fn characteristics(&self) -> &[Characteristic] {
        self.characteristics
    }

    /// Append to the characteristic cache, skipping ones already present.
    pub fn add_characteristics(&mut self, found: impl IntoIterator<Item = Characteristic>) {
        for characteristic in found {
            if !self.characteristics.contains(&characteristic) {
                self.characteristics.push(characteristic);
            }
        }
    }

    /// Services discovered automatically after each connect.
    pub fn auto_discover_services(&self) -> &[Uuid] {
        self.auto_discover
    }

    /// Record a fresh signal strength on the device.
    pub fn set_rssi(&self, rssi: i16) {
        let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
        info.rssi = Some(rssi);
    }
}

/// A queued, multi-step exchange driven by transport callbacks.
///
/// Operations run on the device task and must not block.
#[allow(unused_variables)]
pub trait Operation: Send + 'static {
    /// Short name for logging.
    fn name(&self) -> &'static str {
        "operation"
    }

    /// Called once when the operation becomes the head of the queue.
    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse;

    /// Called instead of completion when the connection is lost.
    fn abort(self: Box<Self>, reason: AbortReason);

    fn on_name_updated(&mut self, ctx: &mut OpContext<'_>, name: &str) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_services_modified(&mut self, ctx: &mut OpContext<'_>, invalidated: &[Uuid]) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_rssi_read(&mut self, ctx: &mut OpContext<'_>, result: &TransportResult<i16>) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_services_discovered(
        &mut self,
        ctx: &mut OpContext<'_>,
        result: &TransportResult<Vec<Uuid>>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_included_services_discovered(
        &mut self,
        ctx: &mut OpContext<'_>,
        service: Uuid,
        result: &TransportResult<Vec<Uuid>>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_characteristics_discovered(
        &mut self,
        ctx: &mut OpContext<'_>,
        service: Uuid,
        result: &TransportResult<Vec<Characteristic>>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_value_updated(
        &mut self,
        ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<Bytes>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_value_written(
        &mut self,
        ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<()>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_notification_state_updated(
        &mut self,
        ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<bool>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_descriptors_discovered(
        &mut self,
        ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<Vec<Uuid>>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_descriptor_value_updated(
        &mut self,
        ctx: &mut OpContext<'_>,
        descriptor: Uuid,
        result: &TransportResult<Bytes>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_descriptor_value_written(
        &mut self,
        ctx: &mut OpContext<'_>,
        descriptor: Uuid,
        result: &TransportResult<()>,
    ) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_ready_to_write_without_response(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        OpResponse::InProgress
    }

    fn on_l2cap_channel_opened(&mut self, ctx: &mut OpContext<'_>, result: &TransportResult<u16>) -> OpResponse {
        OpResponse::InProgress
    }
}

/// Route one peripheral event to the matching handler.
pub(crate) fn dispatch(op: &mut dyn Operation, ctx: &mut OpContext<'_>, event: &PeripheralEvent) -> OpResponse {
    match event {
        PeripheralEvent::NameUpdated(name) => op.on_name_updated(ctx, name),
        PeripheralEvent::ServicesModified(invalidated) => op.on_services_modified(ctx, invalidated),
        PeripheralEvent::RssiRead(result) => op.on_rssi_read(ctx, result),
        PeripheralEvent::ServicesDiscovered(result) => op.on_services_discovered(ctx, result),
        PeripheralEvent::IncludedServicesDiscovered { service, result } => {
            op.on_included_services_discovered(ctx, *service, result)
        }
        PeripheralEvent::CharacteristicsDiscovered { service, result } => {
            op.on_characteristics_discovered(ctx, *service, result)
        }
        PeripheralEvent::ValueUpdated {
            characteristic,
            result,
        } => op.on_value_updated(ctx, *characteristic, result),
        PeripheralEvent::ValueWritten {
            characteristic,
            result,
        } => op.on_value_written(ctx, *characteristic, result),
        PeripheralEvent::NotificationStateUpdated {
            characteristic,
            result,
        } => op.on_notification_state_updated(ctx, *characteristic, result),
        PeripheralEvent::DescriptorsDiscovered {
            characteristic,
            result,
        } => op.on_descriptors_discovered(ctx, *characteristic, result),
        PeripheralEvent::DescriptorValueUpdated { descriptor, result } => {
            op.on_descriptor_value_updated(ctx, *descriptor, result)
        }
        PeripheralEvent::DescriptorValueWritten { descriptor, result } => {
            op.on_descriptor_value_written(ctx, *descriptor, result)
        }
        PeripheralEvent::ReadyToWriteWithoutResponse => op.on_ready_to_write_without_response(ctx),
        PeripheralEvent::L2capChannelOpened(result) => op.on_l2cap_channel_opened(ctx, result),
    }
}
