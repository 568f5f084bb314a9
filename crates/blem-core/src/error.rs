//! Error types for blem-core.
//!
//! # Where errors surface
//!
//! | Error | Surfaces from | Recovery |
//! |-------|---------------|----------|
//! | [`Error::CharacteristicNotFound`] | `Device::subscribe` | Wait for discovery, check the UUID |
//! | [`Error::IncompleteObserver`] | `Device::subscribe` | Set every observer callback |
//! | [`Error::ConnectionAborted`] | every queued operation | Re-enqueue if the caller wants a retry |
//! | [`Error::ScanStartupTimeout`] | the scanner's failed callback | Start a new scanner |
//! | [`Error::Transport`] | the operation that issued the request | Operation specific |
//! | [`Error::DeviceStopped`] | `Device` helpers | The `Central` was shut down |
//! | [`Error::Shutdown`] | `Scanner::start` | Create a new `Central` |
//!
//! Nothing in this crate retries automatically. A failed connect or a
//! disconnect aborts every pending operation and the caller decides whether
//! to enqueue again.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use blem_types::AbortReason;

/// Errors that can occur while orchestrating BLE operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The characteristic is not in the device's discovered characteristic cache.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID that was requested.
        uuid: Uuid,
    },

    /// An observer was registered without one of its required callbacks.
    #[error("Incomplete observer configuration: missing {missing} callback")]
    IncompleteObserver {
        /// Name of the first missing callback.
        missing: &'static str,
    },

    /// The operation was aborted because the connection went away.
    #[error("Connection aborted: {reason}")]
    ConnectionAborted {
        /// Why the queue was aborted.
        reason: AbortReason,
    },

    /// The transport never confirmed that scanning started.
    #[error("Scan did not start within {timeout:?}")]
    ScanStartupTimeout {
        /// The start-up watchdog interval.
        timeout: Duration,
    },

    /// Error payload reported by a transport callback.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bluetooth Low Energy error while setting up the btleplug transport.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available.
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    /// The device task (or a reply channel) is gone.
    #[error("Device task stopped")]
    DeviceStopped,

    /// The `Central` that owned a scanner is gone.
    #[error("Central was shut down")]
    Shutdown,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: Uuid) -> Self {
        Self::CharacteristicNotFound { uuid }
    }

    /// Create an incomplete observer error.
    pub fn incomplete_observer(missing: &'static str) -> Self {
        Self::IncompleteObserver { missing }
    }

    /// Create a connection aborted error.
    pub fn aborted(reason: AbortReason) -> Self {
        Self::ConnectionAborted { reason }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// The abort reason, if this error is a connection abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::ConnectionAborted { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// Opaque error payload carried by a transport callback.
///
/// Cloneable so that one failed callback can be fanned out to several
/// observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transport error: {message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result type alias using blem-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
