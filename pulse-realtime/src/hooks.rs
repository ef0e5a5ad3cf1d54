//! Callback registration with generation-counted cancellation
//!
//! Every observer surface in this crate (watchers, presence hooks,
//! broadcast handlers, notification subscribers) registers callbacks
//! through a [`Hooks`] set. Cancelling a hook bumps its generation
//! counter, so a delivery already in flight when the caller
//! unsubscribed is dropped instead of invoked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Handle returned on registration; pass back to [`Hooks::remove`]
#[derive(Debug, Clone)]
pub struct HookHandle {
    id: u64,
    generation: Arc<AtomicU64>,
}

impl HookHandle {
    /// Registration id, unique within one `Hooks` set
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Hook<T: ?Sized> {
    id: u64,
    generation: Arc<AtomicU64>,
    captured: u64,
    callback: Arc<T>,
}

/// A set of registered callbacks
pub struct Hooks<T: ?Sized> {
    inner: RwLock<Vec<Hook<T>>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> Hooks<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a callback, returning its cancellation handle
    pub fn add(&self, callback: Arc<T>) -> HookHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let generation = Arc::new(AtomicU64::new(0));
        self.inner.write().push(Hook {
            id,
            generation: Arc::clone(&generation),
            captured: 0,
            callback,
        });
        HookHandle { id, generation }
    }

    /// Remove a callback. Bumps the generation first so deliveries
    /// already snapshotted for dispatch are dropped. Idempotent; returns
    /// whether the handle was still registered, so callers tracking
    /// per-registration resources release them exactly once.
    pub fn remove(&self, handle: &HookHandle) -> bool {
        handle.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|h| h.id != handle.id);
        inner.len() != before
    }

    /// Invoke `invoke` once per live callback, in registration order.
    /// Callbacks run outside the lock; a hook cancelled between the
    /// snapshot and its turn is skipped.
    pub fn emit(&self, invoke: impl Fn(&T)) {
        let snapshot: Vec<(Arc<AtomicU64>, u64, Arc<T>)> = self
            .inner
            .read()
            .iter()
            .map(|h| (Arc::clone(&h.generation), h.captured, Arc::clone(&h.callback)))
            .collect();
        for (generation, captured, callback) in snapshot {
            if generation.load(Ordering::SeqCst) == captured {
                invoke(callback.as_ref());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl<T: ?Sized> Default for Hooks<T> {
    fn default() -> Self {
        Self::new()
    }
}
