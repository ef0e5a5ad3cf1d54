//! Realtime session
//!
//! One `RealtimeClient` per session. It owns the channel registry and
//! binds routers, presence trackers, broadcast buses and the notification
//! fanout onto channels, so callers never touch the transport directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use pulse_common::{EntityType, Error, RealtimeConfig, Result};

use crate::broadcast::BroadcastBus;
use crate::channel::{ChannelHandle, ChannelRegistry, MessageSink};
use crate::hooks::HookHandle;
use crate::notifications::{NotificationCallback, NotificationFanout};
use crate::presence::PresenceTracker;
use crate::reconciler::Reconciler;
use crate::router::{EntityFilter, EventRouter, WatchHandle, WatchHandlers};
use crate::transport::{ChannelMessage, Store, Transport};

/// A message sink registered on a channel for the lifetime of a binding.
/// Removing itself on drop matters when the channel name stays open
/// through another binding: the registration must not outlive its owner.
struct BoundSink {
    channel: ChannelHandle,
    sink: HookHandle,
}

impl BoundSink {
    fn new(handle: &ChannelHandle, sink: Arc<MessageSink>) -> Self {
        Self {
            channel: handle.clone(),
            sink: handle.channel().on_message(sink),
        }
    }
}

impl Drop for BoundSink {
    fn drop(&mut self) {
        self.channel.channel().remove_sink(&self.sink);
    }
}

struct RouterBinding {
    router: Arc<EventRouter>,
    _sink: BoundSink,
}

struct PresenceBinding {
    tracker: Arc<PresenceTracker>,
    _sink: BoundSink,
}

struct BroadcastBinding {
    bus: Arc<BroadcastBus>,
    _sink: BoundSink,
}

/// A client session over the realtime layer
pub struct RealtimeClient {
    config: RealtimeConfig,
    registry: Arc<ChannelRegistry>,
    reconciler: Arc<Reconciler>,
    fanout: Arc<NotificationFanout>,
    routers: RwLock<HashMap<String, RouterBinding>>,
    presence: RwLock<HashMap<String, PresenceBinding>>,
    broadcasts: RwLock<HashMap<String, BroadcastBinding>>,
    notification_channels: RwLock<HashMap<String, BoundSink>>,
    reconciler_sinks: RwLock<HashMap<String, BoundSink>>,
}

impl RealtimeClient {
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
    ) -> Self {
        info!("realtime session created");
        let reconciler = Arc::new(Reconciler::new(store, &config));
        Self {
            config,
            registry: Arc::new(ChannelRegistry::new(transport)),
            reconciler,
            fanout: Arc::new(NotificationFanout::new()),
            routers: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            broadcasts: RwLock::new(HashMap::new()),
            notification_channels: RwLock::new(HashMap::new()),
            reconciler_sinks: RwLock::new(HashMap::new()),
        }
    }

    /// The session's channel registry
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Entry point for the transport pump: route one inbound message
    pub fn deliver(&self, channel: &str, message: &ChannelMessage) {
        self.registry.deliver(channel, message);
    }

    /// Open (or reuse) a channel directly
    pub async fn channel(&self, name: &str) -> Result<ChannelHandle> {
        self.check_channel_budget(name)?;
        Ok(self.registry.open(name).await)
    }

    /// Install a scoped entity watcher on a channel
    pub async fn watch_entity(
        &self,
        channel: &str,
        entity_type: EntityType,
        filter: EntityFilter,
        handlers: WatchHandlers,
    ) -> Result<WatchHandle> {
        self.check_channel_budget(channel)?;
        let handle = self.registry.open(channel).await;
        let router = self.router_for(channel, &handle);

        match router.watch(entity_type, filter, handlers) {
            Ok(watch) => Ok(watch),
            Err(e) => {
                // Release the channel reference taken for this watcher.
                self.release_router_ref(channel).await;
                Err(e)
            }
        }
    }

    /// Remove a watcher and release its channel reference. A handle that
    /// was already removed releases nothing, so repeated unwatch calls
    /// cannot tear down a subscription other watchers still hold.
    pub async fn unwatch(&self, channel: &str, watch: &WatchHandle) {
        let removed = self
            .routers
            .read()
            .get(channel)
            .is_some_and(|binding| binding.router.unwatch(watch));
        if removed {
            self.release_router_ref(channel).await;
        }
    }

    /// Drop one channel reference held on behalf of a watcher; the router
    /// binding (and its channel sink) goes with the last watcher.
    async fn release_router_ref(&self, channel: &str) {
        self.registry.close(channel).await;
        let drained = self
            .routers
            .read()
            .get(channel)
            .is_some_and(|binding| binding.router.watcher_count() == 0);
        if drained {
            self.routers.write().remove(channel);
        }
    }

    /// Join a room's presence channel, returning its tracker
    pub async fn presence(&self, room: &str) -> Result<Arc<PresenceTracker>> {
        if let Some(binding) = self.presence.read().get(room) {
            return Ok(Arc::clone(&binding.tracker));
        }
        self.check_channel_budget(room)?;

        let handle = self.registry.open(room).await;
        let tracker = Arc::new(PresenceTracker::new(
            room,
            Arc::clone(self.registry.transport()),
        ));
        tracker.begin_sync();

        let sink_tracker = Arc::clone(&tracker);
        let sink = BoundSink::new(&handle, Arc::new(move |msg| sink_tracker.apply(msg)));

        self.presence.write().insert(
            room.to_string(),
            PresenceBinding {
                tracker: Arc::clone(&tracker),
                _sink: sink,
            },
        );
        Ok(tracker)
    }

    /// Leave a room's presence channel
    pub async fn leave_presence(&self, room: &str) {
        if self.presence.write().remove(room).is_some() {
            self.registry.close(room).await;
        }
    }

    /// Open the broadcast bus for a channel
    pub async fn broadcast(&self, channel: &str) -> Result<Arc<BroadcastBus>> {
        if let Some(binding) = self.broadcasts.read().get(channel) {
            return Ok(Arc::clone(&binding.bus));
        }
        self.check_channel_budget(channel)?;

        let handle = self.registry.open(channel).await;
        let bus = Arc::new(BroadcastBus::new(
            channel,
            Arc::clone(self.registry.transport()),
        ));

        let sink_bus = Arc::clone(&bus);
        let sink = BoundSink::new(&handle, Arc::new(move |msg| sink_bus.apply(msg)));

        self.broadcasts.write().insert(
            channel.to_string(),
            BroadcastBinding {
                bus: Arc::clone(&bus),
                _sink: sink,
            },
        );
        Ok(bus)
    }

    /// Close a channel's broadcast bus
    pub async fn leave_broadcast(&self, channel: &str) {
        if self.broadcasts.write().remove(channel).is_some() {
            self.registry.close(channel).await;
        }
    }

    /// Subscribe to one user's notification inserts
    pub async fn subscribe_notifications(
        &self,
        user_id: &str,
        callback: Arc<NotificationCallback>,
    ) -> Result<HookHandle> {
        let channel = notification_channel(user_id);
        let bound = self.notification_channels.read().contains_key(&channel);
        if !bound {
            self.check_channel_budget(&channel)?;
            let handle = self.registry.open(&channel).await;
            let fanout = Arc::clone(&self.fanout);
            let sink = BoundSink::new(
                &handle,
                Arc::new(move |msg| {
                    if let ChannelMessage::Change(event) = msg {
                        fanout.apply(event);
                    }
                }),
            );
            self.notification_channels.write().insert(channel, sink);
        }
        Ok(self.fanout.subscribe_to_user(user_id, callback))
    }

    /// Drop a notification subscription; the user's channel closes when
    /// the last subscriber leaves
    pub async fn unsubscribe_notifications(&self, user_id: &str, handle: &HookHandle) {
        self.fanout.unsubscribe(user_id, handle);
        if self.fanout.subscriber_count(user_id) == 0 {
            let channel = notification_channel(user_id);
            if self.notification_channels.write().remove(&channel).is_some() {
                self.registry.close(&channel).await;
            }
        }
    }

    /// Feed authoritative inserts from a channel into the reconciler
    pub async fn bind_reconciler(&self, channel: &str) -> Result<()> {
        if self.reconciler_sinks.read().contains_key(channel) {
            return Ok(());
        }
        self.check_channel_budget(channel)?;

        let handle = self.registry.open(channel).await;
        let reconciler = Arc::clone(&self.reconciler);
        let sink = BoundSink::new(
            &handle,
            Arc::new(move |msg| {
                if let ChannelMessage::Change(event) = msg {
                    reconciler.apply_insert(event);
                }
            }),
        );
        self.reconciler_sinks
            .write()
            .insert(channel.to_string(), sink);
        Ok(())
    }

    /// Stop feeding a channel's inserts into the reconciler
    pub async fn unbind_reconciler(&self, channel: &str) {
        if self.reconciler_sinks.write().remove(channel).is_some() {
            self.registry.close(channel).await;
        }
    }

    /// The session's optimistic display list
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// The session's notification fanout (unread counters live here)
    pub fn notifications(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    /// Dispose every channel and binding
    pub async fn shutdown(&self) {
        info!("shutting down realtime session");
        self.routers.write().clear();
        self.presence.write().clear();
        self.broadcasts.write().clear();
        self.notification_channels.write().clear();
        self.reconciler_sinks.write().clear();
        self.registry.close_all().await;
    }

    fn router_for(&self, channel: &str, handle: &ChannelHandle) -> Arc<EventRouter> {
        let mut routers = self.routers.write();
        if let Some(binding) = routers.get(channel) {
            return Arc::clone(&binding.router);
        }
        let router = Arc::new(EventRouter::new());
        let sink_router = Arc::clone(&router);
        let sink = BoundSink::new(
            handle,
            Arc::new(move |msg| {
                if let ChannelMessage::Change(event) = msg {
                    sink_router.dispatch(event);
                }
            }),
        );
        routers.insert(
            channel.to_string(),
            RouterBinding {
                router: Arc::clone(&router),
                _sink: sink,
            },
        );
        router
    }

    fn check_channel_budget(&self, name: &str) -> Result<()> {
        if !self.registry.is_open(name) && self.registry.len() >= self.config.max_channels {
            return Err(Error::Subscription(format!(
                "channel limit of {} reached",
                self.config.max_channels
            )));
        }
        Ok(())
    }
}

fn notification_channel(user_id: &str) -> String {
    format!("user:{user_id}:notifications")
}
