//! Serialized operation orchestration for Bluetooth Low Energy peripherals.
//!
//! A BLE link answers one request at a time, and a single logical exchange
//! (discover, then read, then write) spans several asynchronous callbacks.
//! This crate sequences those exchanges per device, fans notifications out to
//! many observers and keeps exactly one scan running per process.
//!
//! # Features
//!
//! - **Operation queues**: one [`Operation`] active per device, FIFO, with
//!   auto-connect on enqueue and abort on disconnect
//! - **Auto-discovery**: configured services are discovered after each connect,
//!   before anything else runs
//! - **Notification fan-out**: any number of [`Observer`]s per characteristic,
//!   one enable and one disable on the wire
//! - **Owner scopes**: callbacks tied to an [`OwnerContext`] stop when it ends
//! - **Scan arbitration**: newest [`Scanner`] wins, with a grace interval and a
//!   start-up watchdog
//! - **Pluggable transport**: [`btle::BtleplugTransport`] for hardware,
//!   [`MockTransport`] for tests
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use blem_core::{Central, CentralConfig, DeviceOptions, uuids};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = Central::with_btleplug(CentralConfig::default()).await?;
//!
//!     let scanner = central
//!         .scanner(Duration::from_secs(5))
//!         .services(vec![uuids::BATTERY_SERVICE])
//!         .device_factory(|_| {
//!             DeviceOptions::new().auto_discover_services(vec![uuids::BATTERY_SERVICE])
//!         })
//!         .build();
//!     scanner.start().await?;
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!
//!     for device in central.devices().await {
//!         if let Some(level) = device.read(uuids::BATTERY_LEVEL).await? {
//!             println!("{}: {}%", device.name(), level[0]);
//!         }
//!         device.disconnect()?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod device;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod notify;
pub mod operation;
pub mod ops;
pub mod owner;
mod queue;
pub mod scan;
pub mod transport;
pub mod util;

pub use blem_types::types;
pub use blem_types::uuid;

pub use btle::BtleplugTransport;
pub use device::{Device, DeviceInfo, DeviceOptions};
pub use error::{Error, Result, TransportError};
pub use events::{DeviceEvent, EventDispatcher, EventReceiver, EventSender};
pub use manager::{Central, CentralConfig};
pub use mock::{MockPeripheral, MockTransport, MockTransportBuilder, TransportCall};
pub use notify::{DuplicatePolicy, Observer, SubscriptionToken};
pub use operation::{OpContext, OpResponse, Operation};
pub use ops::{Completion, ReadDataOp, ReadRssiOp, ReadStringOp, SnapshotOp, WriteDataOp};
pub use owner::{OwnerContext, OwnerGuard};
pub use scan::{DeviceFactory, Scanner, ScannerBuilder};
pub use transport::{
    DiscoveryBundle, PeripheralEvent, Transport, TransportEvent, TransportEventReceiver,
    TransportEventSender, TransportResult, event_channel,
};
pub use util::device_identity;

// Re-export blem-types for convenience
pub use blem_types::uuid as uuids;
pub use blem_types::{
    AbortReason, AdvertisementData, CharProperties, Characteristic, ConnectionState, PeripheralId,
    RadioState, ScanState,
};
