//! Broadcast bus
//!
//! Ephemeral peer messages over a channel: cursor positions, selections,
//! in-progress content deltas. Best-effort and unpersisted; a message sent
//! while a peer is disconnected is simply lost. Unlike change events there
//! is no re-fetch path, so broadcast must never carry data that has to
//! survive a reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::hooks::{HookHandle, Hooks};
use crate::transport::{ChannelMessage, Transport};

/// Receives the payload of one broadcast message
pub type BroadcastCallback = dyn Fn(&serde_json::Value) + Send + Sync;

/// Sends and receives ephemeral messages on one channel
pub struct BroadcastBus {
    channel: String,
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<String, Arc<Hooks<BroadcastCallback>>>>,
}

impl BroadcastBus {
    pub fn new(channel: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            channel: channel.to_string(),
            transport,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Send a message to peers on this channel. Best effort: transport
    /// failures and absent peers drop the message silently.
    pub async fn send(&self, event: &str, payload: serde_json::Value) {
        let message = ChannelMessage::Broadcast {
            event: event.to_string(),
            payload,
        };
        if let Err(e) = self.transport.publish(&self.channel, message).await {
            debug!(channel = %self.channel, event, error = %e, "broadcast dropped");
        }
    }

    /// Register a handler for one event name
    pub fn on(&self, event: &str, callback: Arc<BroadcastCallback>) -> HookHandle {
        let hooks = {
            let mut handlers = self.handlers.write();
            Arc::clone(
                handlers
                    .entry(event.to_string())
                    .or_insert_with(|| Arc::new(Hooks::new())),
            )
        };
        hooks.add(callback)
    }

    /// Remove a handler registered with [`on`](Self::on)
    pub fn off(&self, event: &str, handle: &HookHandle) {
        if let Some(hooks) = self.handlers.read().get(event) {
            hooks.remove(handle);
        }
    }

    /// Deliver one inbound channel message to matching handlers
    pub fn apply(&self, message: &ChannelMessage) {
        if let ChannelMessage::Broadcast { event, payload } = message {
            let hooks = self.handlers.read().get(event).map(Arc::clone);
            if let Some(hooks) = hooks {
                hooks.emit(|handler| handler(payload));
            }
        }
    }
}
