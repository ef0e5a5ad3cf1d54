//! Channel registry
//!
//! One live channel per name, refcounted. The registry is the sole owner
//! of transport subscriptions; every other component borrows channels
//! through it. Constructed per session, never global.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::hooks::{HookHandle, Hooks};
use crate::transport::{ChannelMessage, ConnectionState, Transport};

/// Callback receiving every message delivered on a channel
pub type MessageSink = dyn Fn(&ChannelMessage) + Send + Sync;

/// A named logical subscription multiplexed over the transport
pub struct Channel {
    name: String,
    state_tx: watch::Sender<ConnectionState>,
    sinks: Hooks<MessageSink>,
}

impl Channel {
    fn new(name: &str) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            name: name.to_string(),
            state_tx,
            sinks: Hooks::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observable connection state; callers re-fetch authoritative state
    /// after observing a Disconnected -> Connected transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Register a sink receiving every message on this channel
    pub fn on_message(&self, sink: Arc<MessageSink>) -> HookHandle {
        self.sinks.add(sink)
    }

    /// Remove a previously registered sink
    pub fn remove_sink(&self, handle: &HookHandle) {
        self.sinks.remove(handle);
    }

    /// Hand one inbound message to every registered sink, in
    /// registration order
    pub fn deliver(&self, message: &ChannelMessage) {
        self.sinks.emit(|sink| sink(message));
    }
}

/// Shared reference to a live channel
#[derive(Clone)]
pub struct ChannelHandle {
    channel: Arc<Channel>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.channel.name())
            .field("state", &self.channel.state())
            .finish()
    }
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}

struct Slot {
    channel: Arc<Channel>,
    refcount: usize,
}

/// Owns transport subscriptions, dedups channels by name, refcounts
pub struct ChannelRegistry {
    transport: Arc<dyn Transport>,
    channels: RwLock<HashMap<String, Slot>>,
}

impl ChannelRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Open (or reuse) the channel for `name`, incrementing its refcount.
    ///
    /// Always returns a handle. A transport connection failure is
    /// reflected in the handle's connection-state observable, never
    /// surfaced as an error; reconnection belongs to the transport.
    pub async fn open(&self, name: &str) -> ChannelHandle {
        let (channel, created) = {
            let mut channels = self.channels.write();
            if let Some(slot) = channels.get_mut(name) {
                slot.refcount += 1;
                (Arc::clone(&slot.channel), false)
            } else {
                let channel = Arc::new(Channel::new(name));
                channels.insert(
                    name.to_string(),
                    Slot {
                        channel: Arc::clone(&channel),
                        refcount: 1,
                    },
                );
                (channel, true)
            }
        };

        if created {
            debug!(channel = name, "opening transport subscription");
            match self.transport.subscribe(name).await {
                Ok(()) => channel.set_state(ConnectionState::Connected),
                Err(e) => {
                    warn!(channel = name, error = %e, "transport subscribe failed");
                    channel.set_state(ConnectionState::Disconnected);
                }
            }
        }

        ChannelHandle { channel }
    }

    /// Decrement the refcount for `name`; tears down the transport
    /// subscription at zero. Idempotent on unknown names.
    pub async fn close(&self, name: &str) {
        let teardown = {
            let mut channels = self.channels.write();
            match channels.get_mut(name) {
                Some(slot) => {
                    slot.refcount -= 1;
                    if slot.refcount == 0 {
                        channels.remove(name).map(|slot| slot.channel)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(channel) = teardown {
            debug!(channel = name, "tearing down transport subscription");
            if let Err(e) = self.transport.unsubscribe(name).await {
                warn!(channel = name, error = %e, "transport unsubscribe failed");
            }
            channel.set_state(ConnectionState::Disconnected);
        }
    }

    /// Dispose every channel regardless of refcount
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<Channel>)> = self
            .channels
            .write()
            .drain()
            .map(|(name, slot)| (name, slot.channel))
            .collect();

        for (name, channel) in drained {
            if let Err(e) = self.transport.unsubscribe(&name).await {
                warn!(channel = %name, error = %e, "transport unsubscribe failed");
            }
            channel.set_state(ConnectionState::Disconnected);
        }
    }

    /// Route one inbound message to the named channel's sinks
    pub fn deliver(&self, name: &str, message: &ChannelMessage) {
        let channel = self
            .channels
            .read()
            .get(name)
            .map(|slot| Arc::clone(&slot.channel));
        match channel {
            Some(channel) => channel.deliver(message),
            None => debug!(channel = name, "dropping message for closed channel"),
        }
    }

    /// Current refcount for a name (0 when closed)
    pub fn refcount(&self, name: &str) -> usize {
        self.channels.read().get(name).map_or(0, |s| s.refcount)
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Number of live channels
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
