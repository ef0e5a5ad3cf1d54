//! Change event router
//!
//! Classifies raw change notifications into entity-scoped insert/update/
//! delete callbacks. Multiple watchers share one channel; each receives
//! only events its own filter passes. An Update that crosses a watcher's
//! filter boundary is reclassified: entering scope is delivered as Insert,
//! leaving scope as Delete. Forwarding the raw kind across the boundary
//! would leave the UI holding entities it can no longer see updates for.

use std::sync::Arc;

use tracing::warn;

use pulse_common::{EntityPayload, EntityType, Error, Result};

use crate::event::{ChangeEvent, ChangeKind};
use crate::hooks::{HookHandle, Hooks};

/// Callback invoked with a classified change event
pub type EventCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Scope predicate over entity payloads
pub type EntityFilter = Arc<dyn Fn(&EntityPayload) -> bool + Send + Sync>;

/// Cancellation handle for a registered watcher
pub type WatchHandle = HookHandle;

/// Per-kind callbacks for one watcher; at least one must be set
#[derive(Default, Clone)]
pub struct WatchHandlers {
    pub on_insert: Option<EventCallback>,
    pub on_update: Option<EventCallback>,
    pub on_delete: Option<EventCallback>,
}

impl WatchHandlers {
    fn is_empty(&self) -> bool {
        self.on_insert.is_none() && self.on_update.is_none() && self.on_delete.is_none()
    }
}

struct Watcher {
    entity_type: EntityType,
    filter: EntityFilter,
    handlers: WatchHandlers,
}

impl Watcher {
    fn passes(&self, payload: Option<&EntityPayload>) -> bool {
        payload.is_some_and(|p| (self.filter)(p))
    }

    fn deliver(&self, event: &ChangeEvent) {
        if event.entity_type != self.entity_type {
            return;
        }
        match event.kind {
            ChangeKind::Insert => {
                if self.passes(event.new.as_ref()) {
                    invoke(&self.handlers.on_insert, event);
                }
            }
            ChangeKind::Delete => {
                if self.passes(event.old.as_ref()) {
                    invoke(&self.handlers.on_delete, event);
                }
            }
            ChangeKind::Update => {
                let old_in = self.passes(event.old.as_ref());
                let new_in = self.passes(event.new.as_ref());
                match (old_in, new_in) {
                    (true, true) => invoke(&self.handlers.on_update, event),
                    (false, true) => {
                        // Entity entered this watcher's scope.
                        let mut entering = event.clone();
                        entering.kind = ChangeKind::Insert;
                        entering.old = None;
                        invoke(&self.handlers.on_insert, &entering);
                    }
                    (true, false) => {
                        // Entity left this watcher's scope.
                        let mut leaving = event.clone();
                        leaving.kind = ChangeKind::Delete;
                        leaving.new = None;
                        invoke(&self.handlers.on_delete, &leaving);
                    }
                    (false, false) => {}
                }
            }
        }
    }
}

fn invoke(callback: &Option<EventCallback>, event: &ChangeEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

/// Routes change events for one channel to its registered watchers
pub struct EventRouter {
    watchers: Hooks<Watcher>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            watchers: Hooks::new(),
        }
    }

    /// Install a scoped watcher. Registering with no handlers at all is
    /// misuse and fails immediately.
    pub fn watch(
        &self,
        entity_type: EntityType,
        filter: EntityFilter,
        handlers: WatchHandlers,
    ) -> Result<WatchHandle> {
        if handlers.is_empty() {
            return Err(Error::Subscription(
                "watcher registered with no handlers".to_string(),
            ));
        }
        Ok(self.watchers.add(Arc::new(Watcher {
            entity_type,
            filter,
            handlers,
        })))
    }

    /// Remove a watcher; deliveries already in flight are dropped.
    /// Returns whether the handle was still registered, so a repeated
    /// unwatch with the same handle stays a no-op for the caller too.
    pub fn unwatch(&self, handle: &WatchHandle) -> bool {
        self.watchers.remove(handle)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Dispatch one raw event to every watcher whose scope it touches.
    /// Malformed events are dropped at this boundary.
    pub fn dispatch(&self, event: &ChangeEvent) {
        if let Err(e) = event.validate() {
            warn!(entity = event.entity_id, error = %e, "dropping malformed change event");
            return;
        }
        self.watchers.emit(|watcher| watcher.deliver(event));
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
