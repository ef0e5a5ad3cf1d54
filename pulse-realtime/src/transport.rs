//! Transport and store boundaries
//!
//! The realtime layer never opens network connections itself. It talks to
//! the platform's pub/sub transport through [`Transport`] and to the
//! authoritative data store through [`Store`]. [`InMemoryTransport`] is a
//! loop-back implementation for tests and single-process embedding.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_common::{EntityPayload, EntityType, Error, Result};

use crate::event::ChangeEvent;
use crate::presence::PresenceRecord;

/// Connection state of a channel's transport subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Messages arriving on (or published to) a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// A durable change to a persisted entity
    Change(ChangeEvent),
    /// An ephemeral peer message; lost if a peer is disconnected
    Broadcast {
        event: String,
        payload: serde_json::Value,
    },
    /// A participant announced presence in the room
    PresenceJoin {
        participant_id: String,
        metadata: serde_json::Value,
    },
    /// A participant left the room
    PresenceLeave { participant_id: String },
    /// Full roster snapshot for the room
    PresenceSync { roster: Vec<PresenceRecord> },
}

/// The pub/sub transport boundary
///
/// Reconnection policy lives behind this trait, not above it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a transport-level subscription for a channel name
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Tear down the transport-level subscription for a channel name
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Publish a message to peers on a channel. Best effort: a message
    /// sent while no peer is listening is simply lost.
    async fn publish(&self, channel: &str, message: ChannelMessage) -> Result<()>;
}

/// The authoritative data store boundary
#[async_trait]
pub trait Store: Send + Sync {
    /// Issue an authoritative write; resolves with the server-confirmed
    /// record (server-assigned id, echoed client token)
    async fn write(
        &self,
        entity_type: EntityType,
        payload: EntityPayload,
    ) -> Result<EntityPayload>;
}

/// Callback through which an [`InMemoryTransport`] loops published
/// messages back into a registry
pub type DeliverySink = Arc<dyn Fn(&str, ChannelMessage) + Send + Sync>;

/// Loop-back transport for tests and single-process embedding
///
/// Tracks live subscriptions so channel-lifecycle properties are
/// observable from the outside.
pub struct InMemoryTransport {
    subscriptions: RwLock<HashSet<String>>,
    subscribe_calls: AtomicUsize,
    fail_next_subscribe: AtomicBool,
    sink: RwLock<Option<DeliverySink>>,
    published: RwLock<Vec<(String, ChannelMessage)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashSet::new()),
            subscribe_calls: AtomicUsize::new(0),
            fail_next_subscribe: AtomicBool::new(false),
            sink: RwLock::new(None),
            published: RwLock::new(Vec::new()),
        }
    }

    /// Attach the delivery sink that receives loop-backed publishes
    pub fn attach(&self, sink: DeliverySink) {
        *self.sink.write() = Some(sink);
    }

    /// Number of currently live transport subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether a subscription is live for `channel`
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.read().contains(channel)
    }

    /// Total subscribe calls ever made
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Everything published so far, in order
    pub fn published(&self) -> Vec<(String, ChannelMessage)> {
        self.published.read().clone()
    }

    /// Make the next subscribe attempt fail with a connection error
    pub fn fail_next_subscribe(&self) {
        self.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    /// Inject an inbound message, as the real transport would on receipt
    pub fn inject(&self, channel: &str, message: ChannelMessage) {
        if let Some(sink) = self.sink.read().clone() {
            sink(channel, message);
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_subscribe.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection(format!(
                "subscribe refused for {channel}"
            )));
        }
        self.subscriptions.write().insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.subscriptions.write().remove(channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: ChannelMessage) -> Result<()> {
        self.published
            .write()
            .push((channel.to_string(), message.clone()));

        if !self.subscriptions.read().contains(channel) {
            // No peer is listening; the message is dropped, not an error.
            debug!(channel, "dropping publish with no live subscription");
            return Ok(());
        }
        if let Some(sink) = self.sink.read().clone() {
            sink(channel, message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_tracking() {
        let transport = InMemoryTransport::new();
        transport.subscribe("room:1").await.unwrap();
        assert!(transport.is_subscribed("room:1"));
        assert_eq!(transport.active_subscriptions(), 1);

        transport.unsubscribe("room:1").await.unwrap();
        assert_eq!(transport.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscription_is_dropped() {
        let transport = InMemoryTransport::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&delivered);
        transport.attach(Arc::new(move |_, _| {
            d.fetch_add(1, Ordering::SeqCst);
        }));

        let msg = ChannelMessage::Broadcast {
            event: "cursor".to_string(),
            payload: serde_json::json!({"x": 1}),
        };
        transport.publish("room:1", msg).await.unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_returns_connection_error() {
        let transport = InMemoryTransport::new();
        transport.fail_next_subscribe();
        let err = transport.subscribe("room:1").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(!transport.is_subscribed("room:1"));
    }
}
