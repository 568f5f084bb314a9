//! Devices and their connection state machine.
//!
//! Every [`Device`] is a handle to a task that owns the device's operation
//! queue, characteristic cache and notification registry. Commands from
//! handles and callbacks from the transport arrive on one channel and are
//! processed in order, so queue, state and observer changes for a device
//! never interleave.
//!
//! Enqueueing an operation on a device that is not connected requests a
//! connection. Operations run one at a time once connected, behind the
//! auto-discovery operation that each new connection puts first. A failed
//! connect, a disconnect or a radio loss aborts everything still queued.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blem_types::{AbortReason, AdvertisementData, Characteristic, ConnectionState, PeripheralId};

use crate::error::{Error, Result, TransportError};
use crate::events::{DeviceEvent, EventDispatcher};
use crate::notify::{DuplicatePolicy, NotifyManager, Observer, SubscriptionToken};
use crate::operation::{OpContext, Operation};
use crate::ops::{
    Completion, DiscoverServicesOp, ReadDataOp, ReadRssiOp, ReadStringOp, SnapshotOp, WriteDataOp,
};
use crate::queue::OperationQueue;
use crate::transport::{PeripheralEvent, Transport};
use crate::util::{UNKNOWN_NAME, device_identity};

/// Snapshot of what is known about a device outside a connection.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    /// Last known signal strength in dBm.
    pub rssi: Option<i16>,
    /// Payload of the most recent advertisement.
    pub advertisement: AdvertisementData,
    /// When the device was last discovered or updated.
    pub last_seen: OffsetDateTime,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rssi: None,
            advertisement: AdvertisementData::default(),
            last_seen: OffsetDateTime::now_utc(),
        }
    }
}

/// How a newly discovered device is set up.
///
/// Returned by a scanner's device factory. The defaults give a plain device
/// named after its advertisement.
#[derive(Clone, Default)]
pub struct DeviceOptions {
    /// Display name overriding the advertised one.
    pub name: Option<String>,
    /// Services whose characteristics are discovered after every connect.
    pub auto_discover_services: Vec<Uuid>,
    /// Application data, retrieved with [`Device::extension`].
    pub extension: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("name", &self.name)
            .field("auto_discover_services", &self.auto_discover_services)
            .field("extension", &self.extension.is_some())
            .finish()
    }
}

impl DeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn auto_discover_services(mut self, services: Vec<Uuid>) -> Self {
        self.auto_discover_services = services;
        self
    }

    #[must_use]
    pub fn extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extension = Some(Arc::new(value));
        self
    }
}

/// Connection lifecycle callbacks routed to a device.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkEvent {
    Connected,
    Disconnected(Option<TransportError>),
    FailedToConnect(Option<TransportError>),
    RadioUnavailable,
}

enum DeviceCommand {
    Enqueue(Box<dyn Operation>),
    Connect,
    Disconnect,
    Subscribe {
        observer: Observer,
        reply: oneshot::Sender<Result<SubscriptionToken>>,
    },
    Unsubscribe(SubscriptionToken),
    UnsubscribeAll(Uuid),
    Characteristics(oneshot::Sender<Vec<Characteristic>>),
    SetAutoDiscover(Vec<Uuid>),
    Link(LinkEvent),
    Peripheral(PeripheralEvent),
}

/// Everything needed to start a device task.
pub(crate) struct DeviceSetup {
    pub(crate) peripheral_id: PeripheralId,
    pub(crate) advertisement: AdvertisementData,
    pub(crate) rssi: Option<i16>,
    pub(crate) options: DeviceOptions,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: EventDispatcher,
    pub(crate) policy: DuplicatePolicy,
    pub(crate) cancel: CancellationToken,
}

/// A remote peripheral.
///
/// Cheap to clone; all clones address the same device task. Devices are
/// created by the [`Central`](crate::Central) on first discovery and live as
/// long as it does.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: Uuid,
    peripheral_id: PeripheralId,
    name_override: bool,
    info: Arc<RwLock<DeviceInfo>>,
    extension: Option<Arc<dyn Any + Send + Sync>>,
    commands: mpsc::UnboundedSender<DeviceCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("peripheral_id", &self.inner.peripheral_id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Start the device task on `runtime` and return a handle to it.
    pub(crate) fn spawn(setup: DeviceSetup, runtime: &Handle) -> Self {
        let DeviceSetup {
            peripheral_id,
            advertisement,
            rssi,
            options,
            transport,
            events,
            policy,
            cancel,
        } = setup;

        let id = device_identity(&peripheral_id);
        let name = options
            .name
            .clone()
            .or_else(|| advertisement.local_name.clone())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        let info = Arc::new(RwLock::new(DeviceInfo {
            name,
            rssi,
            advertisement,
            last_seen: OffsetDateTime::now_utc(),
        }));

        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let actor = DeviceActor {
            id,
            notify: NotifyManager::new(peripheral_id.clone(), transport.clone(), policy),
            peripheral_id: peripheral_id.clone(),
            transport,
            info: info.clone(),
            state: state_tx,
            queue: OperationQueue::new(),
            characteristics: Vec::new(),
            auto_discover: options.auto_discover_services,
            events,
        };
        runtime.spawn(actor.run(receiver, cancel));

        debug!(device = %peripheral_id, %id, "Device task started");
        Self {
            inner: Arc::new(DeviceInner {
                id,
                peripheral_id,
                name_override: options.name.is_some(),
                info,
                extension: options.extension,
                commands,
                state,
            }),
        }
    }

    /// Stable identity derived from the peripheral id.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn peripheral_id(&self) -> &PeripheralId {
        &self.inner.peripheral_id
    }

    pub fn name(&self) -> String {
        self.read_info(|info| info.name.clone())
    }

    /// Last known signal strength in dBm.
    pub fn rssi(&self) -> Option<i16> {
        self.read_info(|info| info.rssi)
    }

    pub fn advertisement(&self) -> AdvertisementData {
        self.read_info(|info| info.advertisement.clone())
    }

    pub fn last_seen(&self) -> OffsetDateTime {
        self.read_info(|info| info.last_seen)
    }

    pub fn info(&self) -> DeviceInfo {
        self.read_info(DeviceInfo::clone)
    }

    /// The application value attached by the device factory, if it is a `T`.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.extension.as_deref()?.downcast_ref()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Wait until the connection state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(ConnectionState) -> bool,
    ) -> Result<ConnectionState> {
        let mut states = self.inner.state.clone();
        let state = states
            .wait_for(|state| predicate(*state))
            .await
            .map_err(|_| Error::DeviceStopped)?;
        Ok(*state)
    }

    /// Queue an operation, connecting first if needed.
    ///
    /// If the device task is gone the operation is aborted and
    /// [`Error::DeviceStopped`] is returned.
    pub fn enqueue(&self, op: impl Operation) -> Result<()> {
        self.enqueue_boxed(Box::new(op))
    }

    pub fn enqueue_boxed(&self, op: Box<dyn Operation>) -> Result<()> {
        match self.inner.commands.send(DeviceCommand::Enqueue(op)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(command)) => {
                if let DeviceCommand::Enqueue(op) = command {
                    op.abort(AbortReason::Disconnected);
                }
                Err(Error::DeviceStopped)
            }
        }
    }

    /// Request a connection. No-op while connecting or connected.
    pub fn connect(&self) -> Result<()> {
        self.send(DeviceCommand::Connect)
    }

    /// Drop the connection and abort everything queued.
    pub fn disconnect(&self) -> Result<()> {
        self.send(DeviceCommand::Disconnect)
    }

    /// Read a characteristic. `Ok(None)` if the device does not have it.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.inner.peripheral_id))]
    pub async fn read(&self, characteristic: Uuid) -> Result<Option<Bytes>> {
        self.request(|done| ReadDataOp::new(characteristic, done)).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.inner.peripheral_id))]
    pub async fn read_string(&self, characteristic: Uuid) -> Result<Option<String>> {
        self.request(|done| ReadStringOp::new(characteristic, done)).await
    }

    /// Write a characteristic. `Ok(false)` if the device does not have it.
    #[tracing::instrument(level = "debug", skip(self, data), fields(device = %self.inner.peripheral_id))]
    pub async fn write(
        &self,
        characteristic: Uuid,
        data: impl Into<Bytes>,
        with_response: bool,
    ) -> Result<bool> {
        let data = data.into();
        self.request(|done| WriteDataOp::new(characteristic, data, with_response, done))
            .await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.inner.peripheral_id))]
    pub async fn read_rssi(&self) -> Result<i16> {
        self.request(ReadRssiOp::new).await
    }

    /// Connect if needed and return the characteristics found by discovery.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.inner.peripheral_id))]
    pub async fn discover(&self) -> Result<Vec<Characteristic>> {
        self.request(SnapshotOp::new).await
    }

    /// The characteristic cache as it is now, without connecting.
    pub async fn characteristics(&self) -> Result<Vec<Characteristic>> {
        let (reply, rx) = oneshot::channel();
        self.send(DeviceCommand::Characteristics(reply))?;
        rx.await.map_err(|_| Error::DeviceStopped)
    }

    /// Register a notification observer.
    ///
    /// The characteristic must already be in the cache, so subscribe after
    /// [`discover`](Self::discover) or any other operation has connected.
    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.inner.peripheral_id, characteristic = %observer.characteristic()))]
    pub async fn subscribe(&self, observer: Observer) -> Result<SubscriptionToken> {
        let (reply, rx) = oneshot::channel();
        self.send(DeviceCommand::Subscribe { observer, reply })?;
        rx.await.map_err(|_| Error::DeviceStopped)?
    }

    /// Remove one observer without calling its stopped callback.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        self.send(DeviceCommand::Unsubscribe(token))
    }

    /// Disable notifications for `characteristic` and stop all its observers.
    pub fn unsubscribe_all(&self, characteristic: Uuid) -> Result<()> {
        self.send(DeviceCommand::UnsubscribeAll(characteristic))
    }

    /// Services discovered after each connect. Takes effect on the next connection.
    pub fn set_auto_discover_services(&self, services: Vec<Uuid>) -> Result<()> {
        self.send(DeviceCommand::SetAutoDiscover(services))
    }

    pub(crate) fn link(&self, event: LinkEvent) {
        let _ = self.inner.commands.send(DeviceCommand::Link(event));
    }

    pub(crate) fn peripheral_event(&self, event: PeripheralEvent) {
        let _ = self.inner.commands.send(DeviceCommand::Peripheral(event));
    }

    /// Record a fresh discovery of this device.
    pub(crate) fn refresh(&self, advertisement: AdvertisementData, rssi: Option<i16>) {
        let mut info = self.inner.info.write().unwrap_or_else(PoisonError::into_inner);
        if !self.inner.name_override
            && let Some(name) = &advertisement.local_name
        {
            info.name = name.clone();
        }
        if rssi.is_some() {
            info.rssi = rssi;
        }
        info.advertisement = advertisement;
        info.last_seen = OffsetDateTime::now_utc();
    }

    async fn request<T, O>(&self, build: impl FnOnce(Completion<T>) -> O) -> Result<T>
    where
        T: Send + 'static,
        O: Operation,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(build(Box::new(move |result| {
            let _ = tx.send(result);
        })))?;
        rx.await.map_err(|_| Error::DeviceStopped)?
    }

    fn send(&self, command: DeviceCommand) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| Error::DeviceStopped)
    }

    fn read_info<T>(&self, f: impl FnOnce(&DeviceInfo) -> T) -> T {
        f(&self.inner.info.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// State owned by the device task.
struct DeviceActor {
    id: Uuid,
    peripheral_id: PeripheralId,
    transport: Arc<dyn Transport>,
    info: Arc<RwLock<DeviceInfo>>,
    state: watch::Sender<ConnectionState>,
    queue: OperationQueue,
    characteristics: Vec<Characteristic>,
    auto_discover: Vec<Uuid>,
    notify: NotifyManager,
    events: EventDispatcher,
}

impl DeviceActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<DeviceCommand>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        commands.close();
        self.queue.abort_all(AbortReason::Disconnected);
        while let Ok(command) = commands.try_recv() {
            if let DeviceCommand::Enqueue(op) = command {
                op.abort(AbortReason::Disconnected);
            }
        }
        self.notify.connection_lost();
        debug!(device = %self.peripheral_id, "Device task stopped");
    }

    fn handle(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::Enqueue(op) => self.enqueue(op),
            DeviceCommand::Connect => self.request_connect(),
            DeviceCommand::Disconnect => self.disconnect(),
            DeviceCommand::Subscribe { observer, reply } => {
                let _ = reply.send(self.notify.subscribe(observer, &self.characteristics));
            }
            DeviceCommand::Unsubscribe(token) => {
                self.notify.unsubscribe(token);
            }
            DeviceCommand::UnsubscribeAll(uuid) => self.notify.unsubscribe_all(uuid),
            DeviceCommand::Characteristics(reply) => {
                let _ = reply.send(self.characteristics.clone());
            }
            DeviceCommand::SetAutoDiscover(services) => self.auto_discover = services,
            DeviceCommand::Link(event) => self.on_link(event),
            DeviceCommand::Peripheral(event) => self.on_peripheral(event),
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(device = %self.peripheral_id, from = ?previous, to = ?state, "Connection state changed");
            self.events.send(DeviceEvent::StateChanged { id: self.id, state });
        }
    }

    fn enqueue(&mut self, op: Box<dyn Operation>) {
        debug!(device = %self.peripheral_id, op = op.name(), queued = self.queue.len(), "Enqueue");
        let was_empty = self.queue.push_back(op);
        match self.current() {
            ConnectionState::Connected => {
                if was_empty {
                    self.start_head();
                }
            }
            ConnectionState::Connecting => {}
            _ => self.request_connect(),
        }
    }

    fn request_connect(&mut self) {
        if !self.current().needs_connect() {
            return;
        }
        if !self.transport.is_ready() {
            self.radio_unavailable();
            return;
        }
        self.set_state(ConnectionState::Connecting);
        self.transport.connect(&self.peripheral_id);
    }

    fn disconnect(&mut self) {
        if self.current() == ConnectionState::Disconnected {
            return;
        }
        if !self.transport.is_ready() {
            self.radio_unavailable();
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        self.characteristics.clear();
        self.queue.abort_all(AbortReason::Disconnected);
        self.notify.connection_lost();
        self.transport.disconnect(&self.peripheral_id);
    }

    fn radio_unavailable(&mut self) {
        let was_connected = self.current() == ConnectionState::Connected;
        self.set_state(ConnectionState::RadioUnavailable);
        self.characteristics.clear();
        self.queue.abort_all(AbortReason::RadioUnavailable);
        if was_connected {
            self.notify.connection_lost();
        }
    }

    fn on_link(&mut self, event: LinkEvent) {
        let state = self.current();
        match (state, event) {
            (ConnectionState::Connecting, LinkEvent::Connected) => {
                self.characteristics.clear();
                self.queue.push_front(Box::new(DiscoverServicesOp::new()));
                self.set_state(ConnectionState::Connected);
                self.start_head();
            }
            (ConnectionState::Connecting, LinkEvent::FailedToConnect(error)) => {
                warn!(device = %self.peripheral_id, error = ?error, "Failed to connect");
                self.set_state(ConnectionState::FailedToConnect);
                self.queue.abort_all(AbortReason::FailedToConnect);
            }
            (ConnectionState::Connected, LinkEvent::Disconnected(error)) => {
                if let Some(error) = &error {
                    warn!(device = %self.peripheral_id, "Disconnected: {}", error);
                }
                self.set_state(ConnectionState::Disconnected);
                self.characteristics.clear();
                self.queue.abort_all(AbortReason::Disconnected);
                self.notify.connection_lost();
            }
            (_, LinkEvent::RadioUnavailable) => self.radio_unavailable(),
            (state, event) => {
                debug!(device = %self.peripheral_id, ?state, ?event, "Ignoring link event");
            }
        }
    }

    fn on_peripheral(&mut self, event: PeripheralEvent) {
        debug!(device = %self.peripheral_id, kind = event.kind(), "Peripheral event");

        if let PeripheralEvent::NameUpdated(name) = &event {
            let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
            info.name = name.clone();
        }

        if self.current() == ConnectionState::Connected {
            let mut ctx = OpContext {
                peripheral_id: &self.peripheral_id,
                transport: self.transport.as_ref(),
                characteristics: &mut self.characteristics,
                auto_discover: &self.auto_discover,
                info: &self.info,
            };
            self.queue.dispatch(&mut ctx, &event);
        }

        match &event {
            PeripheralEvent::ValueUpdated {
                characteristic,
                result,
            } => self.notify.on_value_update(*characteristic, result),
            PeripheralEvent::NotificationStateUpdated {
                characteristic,
                result: Err(error),
            } => self.notify.on_notify_state_error(*characteristic, error),
            _ => {}
        }
    }

    fn start_head(&mut self) {
        let mut ctx = OpContext {
            peripheral_id: &self.peripheral_id,
            transport: self.transport.as_ref(),
            characteristics: &mut self.characteristics,
            auto_discover: &self.auto_discover,
            info: &self.info,
        };
        self.queue.start_head(&mut ctx);
    }
}
