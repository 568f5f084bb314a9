//! Notification fan-out.
//!
//! A peripheral delivers one notification stream per characteristic. The
//! [`NotifyManager`] owned by each device turns that into any number of
//! [`Observer`]s, enabling notifications on the transport when the first
//! observer for a characteristic registers and disabling them when the last
//! one leaves.
//!
//! Observers may be scoped to an [`OwnerContext`]. Observers whose owner has
//! ended are never invoked again and are pruned during the next fan-out.
//!
//! # Example
//!
//! ```ignore
//! use blem_core::{Observer, OwnerContext};
//! use blem_types::uuids;
//!
//! let owner = OwnerContext::new();
//! let token = device
//!     .subscribe(
//!         Observer::new(uuids::HEART_RATE_MEASUREMENT)
//!             .on_data(|value| println!("{:?}", value))
//!             .on_stopped(|| println!("stopped"))
//!             .on_error(|e| eprintln!("{}", e))
//!             .owned_by(&owner),
//!     )
//!     .await?;
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use blem_types::{Characteristic, PeripheralId, uuids::display_uuid};

use crate::error::{Error, Result, TransportError};
use crate::owner::OwnerContext;
use crate::transport::{Transport, TransportResult};

type DataCallback = Box<dyn FnMut(&Bytes) + Send>;
type StoppedCallback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Box<dyn FnMut(&TransportError) + Send>;

/// What counts as a duplicate subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Every subscribe registers a new observer.
    #[default]
    Allow,
    /// A subscribe from an owner that already observes the characteristic
    /// replaces the earlier observer, which receives its stopped callback.
    ReplaceSameOwner,
}

/// Handle returned by a successful subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A notification subscription under construction.
///
/// The data, stopped and error callbacks are all required. Callbacks run on
/// the device task and must not block.
pub struct Observer {
    characteristic: Uuid,
    on_data: Option<DataCallback>,
    on_stopped: Option<StoppedCallback>,
    on_error: Option<ErrorCallback>,
    owner: Option<OwnerContext>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("characteristic", &self.characteristic)
            .field("on_data", &self.on_data.is_some())
            .field("on_stopped", &self.on_stopped.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("owner", &self.owner.as_ref().map(OwnerContext::id))
            .finish()
    }
}

impl Observer {
    pub fn new(characteristic: Uuid) -> Self {
        Self {
            characteristic,
            on_data: None,
            on_stopped: None,
            on_error: None,
            owner: None,
        }
    }

    /// The characteristic this observer is for.
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    #[must_use]
    pub fn on_data(mut self, f: impl FnMut(&Bytes) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    /// Called once when notifications stop for this observer.
    #[must_use]
    pub fn on_stopped(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_stopped = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&TransportError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Scope the observer to `owner`.
    #[must_use]
    pub fn owned_by(mut self, owner: &OwnerContext) -> Self {
        self.owner = Some(owner.clone());
        self
    }

    fn into_parts(self) -> Result<(Uuid, DataCallback, StoppedCallback, ErrorCallback, Option<OwnerContext>)> {
        let on_data = self.on_data.ok_or(Error::incomplete_observer("data"))?;
        let on_stopped = self.on_stopped.ok_or(Error::incomplete_observer("stopped"))?;
        let on_error = self.on_error.ok_or(Error::incomplete_observer("error"))?;
        Ok((self.characteristic, on_data, on_stopped, on_error, self.owner))
    }
}

struct Registration {
    token: SubscriptionToken,
    characteristic: Uuid,
    on_data: DataCallback,
    on_stopped: StoppedCallback,
    on_error: ErrorCallback,
    owner: Option<OwnerContext>,
}

impl Registration {
    fn is_live(&self) -> bool {
        !self.owner.as_ref().is_some_and(OwnerContext::is_ended)
    }
}

/// Per-device observer registry.
pub(crate) struct NotifyManager {
    peripheral_id: PeripheralId,
    transport: Arc<dyn Transport>,
    policy: DuplicatePolicy,
    observers: Vec<Registration>,
    /// Characteristics with notifications enabled on the transport.
    active: Vec<Characteristic>,
    next_token: u64,
}

impl NotifyManager {
    pub(crate) fn new(peripheral_id: PeripheralId, transport: Arc<dyn Transport>, policy: DuplicatePolicy) -> Self {
        Self {
            peripheral_id,
            transport,
            policy,
            observers: Vec::new(),
            active: Vec::new(),
            next_token: 1,
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Validate and register an observer, enabling notify if it is the first
    /// for its characteristic.
    pub(crate) fn subscribe(
        &mut self,
        observer: Observer,
        characteristics: &[Characteristic],
    ) -> Result<SubscriptionToken> {
        let characteristic = characteristics
            .iter()
            .find(|c| c.uuid == observer.characteristic())
            .cloned()
            .ok_or(Error::characteristic_not_found(observer.characteristic()))?;
        let (uuid, on_data, on_stopped, on_error, owner) = observer.into_parts()?;

        if self.policy == DuplicatePolicy::ReplaceSameOwner
            && let Some(owner) = &owner
        {
            self.replace_owner_observer(uuid, owner);
        }

        if !self.active.iter().any(|c| c.uuid == uuid) {
            debug!(characteristic = %display_uuid(&uuid), "Enabling notifications");
            self.transport
                .set_notify_value(&self.peripheral_id, true, &characteristic);
            self.active.push(characteristic);
        }

        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.observers.push(Registration {
            token,
            characteristic: uuid,
            on_data,
            on_stopped,
            on_error,
            owner,
        });
        Ok(token)
    }

    fn replace_owner_observer(&mut self, uuid: Uuid, owner: &OwnerContext) {
        let position = self.observers.iter().position(|r| {
            r.characteristic == uuid && r.owner.as_ref().is_some_and(|o| o.same_owner(owner))
        });
        if let Some(index) = position {
            debug!(characteristic = %display_uuid(&uuid), owner = owner.id(), "Replacing observer");
            let replaced = self.observers.remove(index);
            if replaced.is_live() {
                (replaced.on_stopped)();
            }
        }
    }

    /// Remove one observer without a stopped callback.
    pub(crate) fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let Some(index) = self.observers.iter().position(|r| r.token == token) else {
            return false;
        };
        let removed = self.observers.remove(index);
        self.disable_if_unobserved(removed.characteristic);
        true
    }

    /// Disable notify and stop every observer of `uuid`.
    pub(crate) fn unsubscribe_all(&mut self, uuid: Uuid) {
        let Some(index) = self.active.iter().position(|c| c.uuid == uuid) else {
            return;
        };
        let characteristic = self.active.remove(index);
        debug!(characteristic = %display_uuid(&uuid), "Disabling notifications");
        self.transport
            .set_notify_value(&self.peripheral_id, false, &characteristic);

        let (stopped, kept): (Vec<_>, Vec<_>) =
            self.observers.drain(..).partition(|r| r.characteristic == uuid);
        self.observers = kept;
        for registration in stopped.into_iter().filter(Registration::is_live) {
            (registration.on_stopped)();
        }
    }

    /// Fan a value update out to the live observers of `uuid`.
    pub(crate) fn on_value_update(&mut self, uuid: Uuid, result: &TransportResult<Bytes>) {
        let mut pruned = Vec::new();
        self.observers.retain_mut(|registration| {
            if !registration.is_live() {
                pruned.push(registration.characteristic);
                return false;
            }
            if registration.characteristic == uuid {
                match result {
                    Ok(value) => (registration.on_data)(value),
                    Err(e) => (registration.on_error)(e),
                }
            }
            true
        });

        if !pruned.is_empty() {
            debug!(count = pruned.len(), "Pruned observers with ended owners");
        }
        for characteristic in pruned {
            self.disable_if_unobserved(characteristic);
        }
    }

    /// Report a failed notify-state change to the observers of `uuid`.
    pub(crate) fn on_notify_state_error(&mut self, uuid: Uuid, error: &TransportError) {
        warn!(characteristic = %display_uuid(&uuid), "Notification state change failed: {}", error);
        for registration in self
            .observers
            .iter_mut()
            .filter(|r| r.characteristic == uuid && r.is_live())
        {
            (registration.on_error)(error);
        }
    }

    /// The connection is gone: stop everyone and forget the registry.
    pub(crate) fn connection_lost(&mut self) {
        self.active.clear();
        let observers = std::mem::take(&mut self.observers);
        if !observers.is_empty() {
            debug!(count = observers.len(), "Stopping observers after connection loss");
        }
        for registration in observers.into_iter().filter(Registration::is_live) {
            (registration.on_stopped)();
        }
    }

    fn disable_if_unobserved(&mut self, uuid: Uuid) {
        if self.observers.iter().any(|r| r.characteristic == uuid) {
            return;
        }
        if let Some(index) = self.active.iter().position(|c| c.uuid == uuid) {
            let characteristic = self.active.remove(index);
            debug!(characteristic = %display_uuid(&uuid), "Last observer gone, disabling notifications");
            self.transport
                .set_notify_value(&self.peripheral_id, false, &characteristic);
        }
    }
}
