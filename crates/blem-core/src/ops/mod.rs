//! Built-in operations.
//!
//! Each operation takes a completion callback that is called exactly once:
//! with the result when the operation completes, or with
//! [`Error::ConnectionAborted`] when it is aborted. The async helpers on
//! [`Device`](crate::Device) wrap these callbacks in a oneshot channel.

mod discover;
mod read;
mod rssi;
mod write;

pub(crate) use discover::DiscoverServicesOp;
pub use read::{ReadDataOp, ReadStringOp, SnapshotOp};
pub use rssi::ReadRssiOp;
pub use write::WriteDataOp;

use blem_types::AbortReason;

use crate::error::{Error, Result};

/// Completion callback for an operation producing `T`.
pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Holds a completion until it is used.
pub(crate) struct Reply<T> {
    completion: Option<Completion<T>>,
}

impl<T> Reply<T> {
    pub(crate) fn new(completion: Completion<T>) -> Self {
        Self {
            completion: Some(completion),
        }
    }

    /// Deliver `result`. Later calls are ignored.
    pub(crate) fn send(&mut self, result: Result<T>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }

    pub(crate) fn abort(mut self, reason: AbortReason) {
        self.send(Err(Error::aborted(reason)));
    }
}
