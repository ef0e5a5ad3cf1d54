//! Notification fanout
//!
//! Per-user filtered stream of notification inserts feeding an unread
//! counter. Only inserts are counted and delivered here; marking
//! notifications read is an explicit caller action, never inferred.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use pulse_common::{EntityPayload, NotificationRecord};

use crate::event::{ChangeEvent, ChangeKind};
use crate::hooks::{HookHandle, Hooks};

/// Receives one notification insert for the subscribed user
pub type NotificationCallback = dyn Fn(&NotificationRecord) + Send + Sync;

struct UserFeed {
    hooks: Hooks<NotificationCallback>,
    unread: AtomicUsize,
}

impl UserFeed {
    fn new() -> Self {
        Self {
            hooks: Hooks::new(),
            unread: AtomicUsize::new(0),
        }
    }
}

/// Routes notification inserts to per-user subscribers
pub struct NotificationFanout {
    feeds: RwLock<HashMap<String, Arc<UserFeed>>>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to notification inserts scoped to one user
    pub fn subscribe_to_user(
        &self,
        user_id: &str,
        callback: Arc<NotificationCallback>,
    ) -> HookHandle {
        self.feed(user_id).hooks.add(callback)
    }

    /// Remove a subscription made with
    /// [`subscribe_to_user`](Self::subscribe_to_user)
    pub fn unsubscribe(&self, user_id: &str, handle: &HookHandle) {
        if let Some(feed) = self.feeds.read().get(user_id) {
            feed.hooks.remove(handle);
        }
    }

    /// Deliver one change event. Anything but a notification insert is
    /// ignored.
    pub fn apply(&self, event: &ChangeEvent) {
        if event.kind != ChangeKind::Insert {
            return;
        }
        let Some(EntityPayload::Notification(record)) = event.new.as_ref() else {
            return;
        };

        let feed = self.feeds.read().get(&record.user_id).map(Arc::clone);
        let Some(feed) = feed else {
            debug!(user = %record.user_id, "notification insert with no subscriber");
            return;
        };
        if !record.is_read {
            feed.unread.fetch_add(1, Ordering::SeqCst);
        }
        feed.hooks.emit(|hook| hook(record));
    }

    /// Unread count accumulated for a user
    pub fn unread_count(&self, user_id: &str) -> usize {
        self.feeds
            .read()
            .get(user_id)
            .map_or(0, |feed| feed.unread.load(Ordering::SeqCst))
    }

    /// Decrement the unread counter after the caller marked `n`
    /// notifications read
    pub fn mark_read(&self, user_id: &str, n: usize) {
        if let Some(feed) = self.feeds.read().get(user_id) {
            let mut current = feed.unread.load(Ordering::SeqCst);
            loop {
                let next = current.saturating_sub(n);
                match feed.unread.compare_exchange(
                    current,
                    next,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
    }

    /// Number of live subscriptions for a user
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.feeds
            .read()
            .get(user_id)
            .map_or(0, |feed| feed.hooks.len())
    }

    /// Zero the unread counter (caller viewed the whole feed)
    pub fn reset_unread(&self, user_id: &str) {
        if let Some(feed) = self.feeds.read().get(user_id) {
            feed.unread.store(0, Ordering::SeqCst);
        }
    }

    fn feed(&self, user_id: &str) -> Arc<UserFeed> {
        let mut feeds = self.feeds.write();
        Arc::clone(
            feeds
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(UserFeed::new())),
        )
    }
}

impl Default for NotificationFanout {
    fn default() -> Self {
        Self::new()
    }
}
