//! Owner contexts for callback lifetimes.
//!
//! Observers and state listeners can be scoped to an [`OwnerContext`]. Once
//! the owner is ended (explicitly, or by dropping its [`OwnerGuard`]) every
//! registration scoped to it is skipped and pruned the next time it would
//! have been invoked.
//!
//! ```
//! use blem_core::OwnerContext;
//!
//! let owner = OwnerContext::new();
//! let guard = owner.guard();
//! assert!(!owner.is_ended());
//! drop(guard);
//! assert!(owner.is_ended());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::{CancellationToken, DropGuard};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Ends its owner when dropped.
pub type OwnerGuard = DropGuard;

/// A liveness scope for registered callbacks.
///
/// Clones share the same liveness.
#[derive(Debug, Clone)]
pub struct OwnerContext {
    id: u64,
    token: CancellationToken,
}

impl OwnerContext {
    pub fn new() -> Self {
        Self {
            id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    /// A context that also ends when `self` ends.
    pub fn child(&self) -> Self {
        Self {
            id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
            token: self.token.child_token(),
        }
    }

    /// Identity used to tell owners apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// End the owner. Idempotent.
    pub fn end(&self) {
        self.token.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Guard that ends the owner when dropped.
    #[must_use = "the owner ends as soon as the guard is dropped"]
    pub fn guard(&self) -> OwnerGuard {
        self.token.clone().drop_guard()
    }

    /// Resolves once the owner has ended.
    pub async fn ended(&self) {
        self.token.cancelled().await;
    }

    pub(crate) fn same_owner(&self, other: &OwnerContext) -> bool {
        self.id == other.id
    }
}

impl Default for OwnerContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A list of owner-scoped entries, pruned lazily while iterating.
pub(crate) struct OwnedList<T> {
    entries: Vec<(Option<OwnerContext>, T)>,
}

impl<T> OwnedList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, owner: Option<OwnerContext>, item: T) {
        self.entries.push((owner, item));
    }

    /// Visit live entries in insertion order, dropping ended ones.
    pub(crate) fn for_each_live(&mut self, mut f: impl FnMut(&mut T)) {
        self.entries.retain_mut(|(owner, item)| {
            if owner.as_ref().is_some_and(OwnerContext::is_ended) {
                return false;
            }
            f(item);
            true
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
