//! The central coordinator.
//!
//! A [`Central`] owns the transport handle, the device registry and the
//! active-scanner slot. It runs one routing task that takes every
//! [`TransportEvent`] and hands it to exactly one place: discoveries go to the
//! registry and the active scanner, connection callbacks and per-peripheral
//! callbacks go to the matching device task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blem_types::{PeripheralId, RadioState, ScanState};

use crate::device::{Device, DeviceSetup, LinkEvent};
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventDispatcher, EventReceiver};
use crate::notify::DuplicatePolicy;
use crate::owner::{OwnedList, OwnerContext};
use crate::scan::{Scanner, ScannerBuilder};
use crate::transport::{DiscoveryBundle, Transport, TransportEvent, TransportEventReceiver, event_channel};

type RadioListener = Box<dyn FnMut(RadioState) + Send>;

/// Configuration for a [`Central`].
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// Pause between stopping the previous scan and starting the next.
    pub scan_grace_interval: Duration,
    /// How long a scanner may wait to start before it fails.
    pub scan_startup_timeout: Duration,
    /// Capacity of the [`DeviceEvent`] broadcast channel.
    pub event_capacity: usize,
    /// What a repeated subscribe from the same owner does.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            scan_grace_interval: Duration::from_secs(1),
            scan_startup_timeout: Duration::from_secs(10),
            event_capacity: 100,
            duplicate_policy: DuplicatePolicy::Allow,
        }
    }
}

impl CentralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scan_grace_interval(mut self, interval: Duration) -> Self {
        self.scan_grace_interval = interval;
        self
    }

    #[must_use]
    pub fn scan_startup_timeout(mut self, timeout: Duration) -> Self {
        self.scan_startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the event capacity is zero or the
    /// start-up timeout does not exceed the grace interval.
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be > 0".to_string()));
        }
        if self.scan_startup_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "scan_startup_timeout must be > 0".to_string(),
            ));
        }
        if self.scan_startup_timeout <= self.scan_grace_interval {
            return Err(Error::InvalidConfig(
                "scan_startup_timeout must be > scan_grace_interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// State shared by the central handle, the routing task and scanners.
pub(crate) struct CentralShared {
    transport: Arc<dyn Transport>,
    pub(crate) config: CentralConfig,
    registry: RwLock<HashMap<PeripheralId, Device>>,
    active: Mutex<Option<Scanner>>,
    radio: watch::Sender<RadioState>,
    radio_listeners: Mutex<OwnedList<RadioListener>>,
    pub(crate) events: EventDispatcher,
    cancel: CancellationToken,
    pub(crate) runtime: Handle,
}

/// Entry point: owns the transport and every device it has seen.
///
/// Dropping the central (or calling [`shutdown`](Self::shutdown)) stops
/// event routing and every device task.
pub struct Central {
    shared: Arc<CentralShared>,
}

impl std::fmt::Debug for Central {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Central")
            .field("config", &self.shared.config)
            .field("radio", &*self.shared.radio.borrow())
            .finish_non_exhaustive()
    }
}

impl Central {
    /// Create a central over `transport`, routing the events it reports on
    /// `events`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: TransportEventReceiver,
        config: CentralConfig,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = Handle::current();
        let (radio, _) = watch::channel(RadioState::Unknown);
        let shared = Arc::new(CentralShared {
            transport,
            registry: RwLock::new(HashMap::new()),
            active: Mutex::new(None),
            radio,
            radio_listeners: Mutex::new(OwnedList::new()),
            events: EventDispatcher::new(config.event_capacity),
            cancel: CancellationToken::new(),
            runtime: runtime.clone(),
            config,
        });
        runtime.spawn(route(shared.clone(), events));

        debug!("Central started");
        Ok(Self { shared })
    }

    /// Create a central over the first btleplug adapter.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn with_btleplug(config: CentralConfig) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = event_channel();
        let transport = crate::btle::BtleplugTransport::new(tx).await?;
        Self::new(Arc::new(transport), rx, config)
    }

    pub fn config(&self) -> &CentralConfig {
        &self.shared.config
    }

    /// Whether the transport can take requests.
    pub fn is_ready(&self) -> bool {
        self.shared.transport.is_ready()
    }

    /// Start building a scanner that scans for `duration` once started.
    pub fn scanner(&self, duration: Duration) -> ScannerBuilder {
        ScannerBuilder::new(Arc::downgrade(&self.shared), duration)
    }

    pub fn active_scanner(&self) -> Option<Scanner> {
        self.shared.active_scanner()
    }

    /// Stop whatever scanner is active.
    pub fn end_active_scanner(&self) {
        if let Some(scanner) = self.active_scanner() {
            scanner.stop();
        }
    }

    /// Every device discovered so far.
    pub async fn devices(&self) -> Vec<Device> {
        self.shared.registry.read().await.values().cloned().collect()
    }

    pub async fn device(&self, id: &PeripheralId) -> Option<Device> {
        self.shared.device(id).await
    }

    /// Look a device up by its stable identity.
    pub async fn device_by_id(&self, id: Uuid) -> Option<Device> {
        self.shared
            .registry
            .read()
            .await
            .values()
            .find(|device| device.id() == id)
            .cloned()
    }

    pub fn radio_state(&self) -> RadioState {
        *self.shared.radio.borrow()
    }

    /// A receiver that observes every radio state change.
    pub fn radio_states(&self) -> watch::Receiver<RadioState> {
        self.shared.radio.subscribe()
    }

    /// Call `listener` with every reported radio state until `owner` ends.
    ///
    /// Listeners run on the routing task and must not register further
    /// listeners.
    pub fn add_radio_listener(
        &self,
        owner: Option<&OwnerContext>,
        listener: impl FnMut(RadioState) + Send + 'static,
    ) {
        self.shared
            .radio_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(owner.cloned(), Box::new(listener));
    }

    /// Subscribe to the [`DeviceEvent`] stream.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.shared.events
    }

    /// Stop routing and every device task. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("Shutting down central");
            self.end_active_scanner();
            self.shared.cancel.cancel();
        }
    }
}

impl Drop for Central {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CentralShared {
    fn active_scanner(&self) -> Option<Scanner> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn device(&self, id: &PeripheralId) -> Option<Device> {
        self.registry.read().await.get(id).cloned()
    }

    /// Make `scanner` the active scanner, preempting the previous one, and
    /// start scanning after the grace interval.
    pub(crate) async fn activate(&self, scanner: &Scanner) {
        if scanner.state() != ScanState::Waiting {
            return;
        }

        let previous = {
            let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            slot.replace(scanner.clone())
        };
        if let Some(previous) = previous.filter(|p| !p.same(scanner)) {
            info!(previous = previous.id(), next = scanner.id(), "Preempting active scanner");
            previous.stop();
        }
        self.transport.stop_scan();

        tokio::select! {
            _ = tokio::time::sleep(self.config.scan_grace_interval) => {}
            _ = scanner.done() => return,
            _ = self.cancel.cancelled() => return,
        }

        let still_active = self.active_scanner().is_some_and(|active| active.same(scanner));
        if !still_active || !scanner.begin_scanning() {
            debug!(scanner = scanner.id(), "Scanner no longer waiting after grace interval");
            return;
        }

        info!(scanner = scanner.id(), duration = ?scanner.duration(), "Scan started");
        self.transport.start_scan(scanner.services());
        self.events.send(DeviceEvent::ScanStarted {
            services: scanner.services().to_vec(),
        });
        scanner.arm_duration(&self.runtime);
    }

    /// Clear the active slot if it holds `scanner`.
    pub(crate) fn release(&self, scanner: &Scanner, was_scanning: bool) {
        let released = {
            let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|active| active.same(scanner)) {
                *slot = None;
                true
            } else {
                false
            }
        };
        if released && was_scanning {
            self.transport.stop_scan();
        }
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::RadioStateUpdated(state) => self.on_radio_state(state).await,
            TransportEvent::Discovered(bundle) => self.on_discovered(bundle).await,
            TransportEvent::Connected(id) => self.link(&id, LinkEvent::Connected).await,
            TransportEvent::Disconnected { id, error } => {
                self.link(&id, LinkEvent::Disconnected(error)).await
            }
            TransportEvent::FailedToConnect { id, error } => {
                self.link(&id, LinkEvent::FailedToConnect(error)).await
            }
            TransportEvent::Peripheral { id, event } => match self.device(&id).await {
                Some(device) => device.peripheral_event(event),
                None => debug!(peripheral = %id, kind = event.kind(), "Event for unknown peripheral"),
            },
        }
    }

    async fn on_radio_state(&self, state: RadioState) {
        let previous = self.radio.send_replace(state);
        if previous != state {
            info!(?previous, ?state, "Radio state changed");
            self.events.send(DeviceEvent::RadioStateChanged { state });
        }

        self.radio_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .for_each_live(|listener| listener(state));

        if !state.is_powered_on() {
            for device in self.registry.read().await.values() {
                device.link(LinkEvent::RadioUnavailable);
            }
        }
    }

    async fn on_discovered(&self, bundle: DiscoveryBundle) {
        let Some(scanner) = self.active_scanner() else {
            debug!(peripheral = %bundle.peripheral_id, "Discovery without an active scanner");
            return;
        };

        let device = {
            let mut registry = self.registry.write().await;
            match registry.get(&bundle.peripheral_id) {
                Some(device) => {
                    device.refresh(bundle.advertisement, bundle.rssi);
                    device.clone()
                }
                None => {
                    let options = scanner.device_options(&bundle);
                    let device = Device::spawn(
                        DeviceSetup {
                            peripheral_id: bundle.peripheral_id.clone(),
                            advertisement: bundle.advertisement,
                            rssi: bundle.rssi,
                            options,
                            transport: self.transport.clone(),
                            events: self.events.clone(),
                            policy: self.config.duplicate_policy,
                            cancel: self.cancel.child_token(),
                        },
                        &self.runtime,
                    );
                    info!(peripheral = %bundle.peripheral_id, name = %device.name(), "New device");
                    registry.insert(bundle.peripheral_id, device.clone());
                    device
                }
            }
        };

        self.events.send(DeviceEvent::Discovered {
            id: device.id(),
            name: device.name(),
            rssi: device.rssi(),
        });
        scanner.deliver(&device);
    }

    async fn link(&self, id: &PeripheralId, event: LinkEvent) {
        match self.device(id).await {
            Some(device) => device.link(event),
            None => warn!(peripheral = %id, ?event, "Connection event for unknown peripheral"),
        }
    }
}

async fn route(shared: Arc<CentralShared>, mut events: TransportEventReceiver) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        shared.handle(event).await;
    }
    debug!("Central routing stopped");
}
