//! Pulse Realtime Layer
//!
//! Distributes concurrent mutations to client sessions:
//! - Refcounted channel registry over a pluggable transport
//! - Change-event routing with scope-boundary reclassification
//! - Room-scoped presence rosters
//! - Ephemeral peer broadcast
//! - Optimistic write reconciliation against the authoritative stream
//! - Per-user notification fanout

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcast;
pub mod channel;
pub mod client;
pub mod event;
pub mod hooks;
pub mod notifications;
pub mod presence;
pub mod reconciler;
pub mod router;
pub mod transport;

pub use broadcast::BroadcastBus;
pub use channel::{Channel, ChannelHandle, ChannelRegistry};
pub use client::RealtimeClient;
pub use event::{ChangeEvent, ChangeKind};
pub use hooks::{HookHandle, Hooks};
pub use notifications::NotificationFanout;
pub use presence::{PresenceRecord, PresenceTracker, SyncState};
pub use reconciler::{EntryStatus, OptimisticEntry, Reconciler};
pub use router::{EntityFilter, EventCallback, EventRouter, WatchHandle, WatchHandlers};
pub use transport::{
    ChannelMessage, ConnectionState, InMemoryTransport, Store, Transport,
};
