//! Integration tests for the realtime layer
//!
//! Drives a full session over the loop-back transport: watchers, presence,
//! broadcast, optimistic reconciliation and notification fanout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use pulse_common::{
    CommentRecord, EntityPayload, EntityType, NotificationRecord, RealtimeConfig, Result,
};
use pulse_realtime::{
    ChangeEvent, ChangeKind, ChannelMessage, ConnectionState, EntryStatus, InMemoryTransport,
    RealtimeClient, Store, WatchHandlers,
};

/// Store that assigns ids c123, c124, ... and echoes the client token.
struct EchoStore {
    next_id: RwLock<u32>,
}

impl EchoStore {
    fn new() -> Self {
        Self {
            next_id: RwLock::new(123),
        }
    }
}

#[async_trait]
impl Store for EchoStore {
    async fn write(
        &self,
        _entity_type: EntityType,
        mut payload: EntityPayload,
    ) -> Result<EntityPayload> {
        let mut next = self.next_id.write();
        payload.set_entity_id(&format!("c{}", *next));
        *next += 1;
        Ok(payload)
    }
}

/// A session wired to a loop-back transport: everything published comes
/// straight back through the client's delivery path.
fn session() -> (Arc<InMemoryTransport>, Arc<RealtimeClient>) {
    let transport = Arc::new(InMemoryTransport::new());
    let client = Arc::new(RealtimeClient::new(
        RealtimeConfig::default(),
        transport.clone(),
        Arc::new(EchoStore::new()),
    ));
    let sink_client = Arc::clone(&client);
    transport.attach(Arc::new(move |channel, message| {
        sink_client.deliver(channel, &message);
    }));
    (transport, client)
}

fn comment(id: &str, post_id: &str, body: &str) -> EntityPayload {
    EntityPayload::Comment(CommentRecord {
        id: id.to_string(),
        post_id: post_id.to_string(),
        author_id: "u1".to_string(),
        body: body.to_string(),
        client_token: None,
        created_at: Utc::now(),
    })
}

#[tokio::test]
async fn test_single_subscription_across_open_close_sequences() {
    let (transport, client) = session();

    let handlers = || WatchHandlers {
        on_insert: Some(Arc::new(|_| {})),
        ..WatchHandlers::default()
    };

    let w1 = client
        .watch_entity("room-42", EntityType::Comment, Arc::new(|_| true), handlers())
        .await
        .unwrap();
    let w2 = client
        .watch_entity("room-42", EntityType::Comment, Arc::new(|_| true), handlers())
        .await
        .unwrap();
    let w3 = client
        .watch_entity("room-42", EntityType::Comment, Arc::new(|_| true), handlers())
        .await
        .unwrap();

    // Any number of watchers, one transport subscription.
    assert_eq!(transport.subscribe_calls(), 1);
    assert_eq!(transport.active_subscriptions(), 1);

    client.unwatch("room-42", &w2).await;
    client.unwatch("room-42", &w1).await;
    assert!(transport.is_subscribed("room-42"));

    client.unwatch("room-42", &w3).await;
    assert!(!transport.is_subscribed("room-42"));
}

#[tokio::test]
async fn test_boundary_crossing_updates_reclassified() {
    let (transport, client) = session();

    let kinds: Arc<Mutex<Vec<ChangeKind>>> = Arc::new(Mutex::new(Vec::new()));
    let record = |kinds: &Arc<Mutex<Vec<ChangeKind>>>| -> pulse_realtime::EventCallback {
        let kinds = Arc::clone(kinds);
        Arc::new(move |e: &ChangeEvent| kinds.lock().push(e.kind))
    };

    client
        .watch_entity(
            "post:p1:comments",
            EntityType::Comment,
            Arc::new(|p| matches!(p, EntityPayload::Comment(c) if c.post_id == "p1")),
            WatchHandlers {
                on_insert: Some(record(&kinds)),
                on_update: Some(record(&kinds)),
                on_delete: Some(record(&kinds)),
            },
        )
        .await
        .unwrap();

    // Moved into scope, edited in scope, moved out of scope.
    transport.inject(
        "post:p1:comments",
        ChannelMessage::Change(ChangeEvent::update(
            comment("c1", "p9", "hi"),
            comment("c1", "p1", "hi"),
        )),
    );
    transport.inject(
        "post:p1:comments",
        ChannelMessage::Change(ChangeEvent::update(
            comment("c1", "p1", "hi"),
            comment("c1", "p1", "hi!"),
        )),
    );
    transport.inject(
        "post:p1:comments",
        ChannelMessage::Change(ChangeEvent::update(
            comment("c1", "p1", "hi!"),
            comment("c1", "p9", "hi!"),
        )),
    );

    assert_eq!(
        kinds.lock().as_slice(),
        &[ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
    );
}

#[tokio::test]
async fn test_post_hello_reconciles_without_duplicate() {
    let (transport, client) = session();
    client.bind_reconciler("post:p1:comments").await.unwrap();

    let reconciler = client.reconciler();
    let local_id = reconciler.add(comment("", "p1", "Hello"));

    // Optimistic entry is visible immediately.
    let entry = reconciler.entry(&local_id).unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.local_id.starts_with("local-"));

    let record = reconciler.commit(&local_id).await.unwrap();
    assert_eq!(record.entity_id(), "c123");

    // The change stream echoes the insert the write already confirmed.
    transport.inject(
        "post:p1:comments",
        ChannelMessage::Change(ChangeEvent::insert(record)),
    );

    let entries = reconciler.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Confirmed);
    assert_eq!(entries[0].server_id.as_deref(), Some("c123"));
}

#[tokio::test]
async fn test_two_connections_one_roster_entry() {
    let (_transport, client) = session();
    let tracker = client.presence("roomA").await.unwrap();

    // Two sessions of the same user announce themselves; the loop-back
    // transport echoes both joins into the room.
    tracker
        .track("u1", serde_json::json!({"device": "laptop"}))
        .await
        .unwrap();
    tracker
        .track("u1", serde_json::json!({"device": "phone"}))
        .await
        .unwrap();

    assert_eq!(tracker.roster_len(), 1);
    let roster = tracker.roster();
    assert_eq!(roster[0].participant_id, "u1");
    // Last write wins on metadata.
    assert_eq!(roster[0].metadata, serde_json::json!({"device": "phone"}));
}

#[tokio::test]
async fn test_roster_matches_distinct_participants_after_sync() {
    let (transport, client) = session();
    let tracker = client.presence("roomA").await.unwrap();

    let synced_size = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&synced_size);
    tracker.on_sync(Arc::new(move |roster| {
        s.store(roster.len(), Ordering::SeqCst);
    }));

    let record = |id: &str| pulse_realtime::PresenceRecord {
        participant_id: id.to_string(),
        metadata: serde_json::json!({}),
        joined_at: Utc::now(),
    };
    transport.inject(
        "roomA",
        ChannelMessage::PresenceSync {
            roster: vec![record("u1"), record("u2"), record("u1")],
        },
    );

    assert_eq!(synced_size.load(Ordering::SeqCst), 2);
    assert_eq!(tracker.roster_len(), 2);

    // Leave for an absent participant is a no-op.
    transport.inject(
        "roomA",
        ChannelMessage::PresenceLeave {
            participant_id: "ghost".to_string(),
        },
    );
    assert_eq!(tracker.roster_len(), 2);
}

#[tokio::test]
async fn test_broadcast_with_zero_peers_is_lost_silently() {
    let (transport, client) = session();

    let bus = client.broadcast("roomB").await.unwrap();
    client.leave_broadcast("roomB").await;
    assert_eq!(transport.active_subscriptions(), 0);

    // No peer is connected; the message is dropped without error.
    bus.send("cursor", serde_json::json!({"x": 3, "y": 7})).await;

    // Recorded at the transport boundary, delivered to no one, kept
    // nowhere.
    assert_eq!(transport.published().len(), 1);
}

#[tokio::test]
async fn test_broadcast_roundtrip_between_handlers() {
    let (_transport, client) = session();
    let bus = client.broadcast("roomB").await.unwrap();

    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    bus.on(
        "cursor",
        Arc::new(move |payload| {
            s.lock().push(payload.clone());
        }),
    );

    bus.send("cursor", serde_json::json!({"x": 1})).await;
    bus.send("selection", serde_json::json!({"from": 0})).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], serde_json::json!({"x": 1}));
}

#[tokio::test]
async fn test_notification_fanout_and_unread_counter() {
    let (transport, client) = session();

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&received);
    client
        .subscribe_notifications(
            "u1",
            Arc::new(move |n: &NotificationRecord| {
                r.lock().push(n.id.clone());
            }),
        )
        .await
        .unwrap();

    let notification = |id: &str, user: &str| {
        ChannelMessage::Change(ChangeEvent::insert(EntityPayload::Notification(
            NotificationRecord {
                id: id.to_string(),
                user_id: user.to_string(),
                kind: "mention".to_string(),
                title: "Mentioned".to_string(),
                message: "You were mentioned".to_string(),
                related_entity: None,
                is_read: false,
                created_at: Utc::now(),
            },
        )))
    };

    transport.inject("user:u1:notifications", notification("n1", "u1"));
    transport.inject("user:u1:notifications", notification("n2", "u1"));

    assert_eq!(received.lock().as_slice(), &["n1", "n2"]);
    assert_eq!(client.notifications().unread_count("u1"), 2);

    // Read state is an explicit caller action.
    client.notifications().mark_read("u1", 1);
    assert_eq!(client.notifications().unread_count("u1"), 1);
}

#[tokio::test]
async fn test_connection_failure_exposed_as_state_not_error() {
    let (transport, client) = session();
    transport.fail_next_subscribe();

    let handle = client.channel("room:flaky").await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    // The channel is still registered; a later close is clean.
    client.registry().close("room:flaky").await;
    assert!(!client.registry().is_open("room:flaky"));
}

#[tokio::test]
async fn test_repeated_unwatch_does_not_drop_remaining_watcher() {
    let (transport, client) = session();

    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let w1 = client
        .watch_entity(
            "room-42",
            EntityType::Comment,
            Arc::new(|_| true),
            WatchHandlers {
                on_insert: Some(Arc::new(|_| {})),
                ..WatchHandlers::default()
            },
        )
        .await
        .unwrap();
    let w2 = client
        .watch_entity(
            "room-42",
            EntityType::Comment,
            Arc::new(|_| true),
            WatchHandlers {
                on_insert: Some(Arc::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                })),
                ..WatchHandlers::default()
            },
        )
        .await
        .unwrap();

    // Unwatching the same handle twice releases one reference, not two.
    client.unwatch("room-42", &w1).await;
    client.unwatch("room-42", &w1).await;
    assert!(transport.is_subscribed("room-42"));

    transport.inject(
        "room-42",
        ChannelMessage::Change(ChangeEvent::insert(comment("c1", "p1", "hi"))),
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);

    client.unwatch("room-42", &w2).await;
    assert!(!transport.is_subscribed("room-42"));
}

#[tokio::test]
async fn test_leaving_presence_on_shared_channel_stops_presence_only() {
    let (transport, client) = session();

    // Broadcast and presence bound to the same channel name.
    let bus = client.broadcast("roomA").await.unwrap();
    let tracker = client.presence("roomA").await.unwrap();
    assert_eq!(transport.active_subscriptions(), 1);

    let joins = Arc::new(AtomicUsize::new(0));
    let j = Arc::clone(&joins);
    tracker.on_join(Arc::new(move |_| {
        j.fetch_add(1, Ordering::SeqCst);
    }));

    client.leave_presence("roomA").await;
    assert!(transport.is_subscribed("roomA"));

    // Presence traffic on the still-open channel no longer reaches the
    // detached tracker.
    transport.inject(
        "roomA",
        ChannelMessage::PresenceJoin {
            participant_id: "u2".to_string(),
            metadata: serde_json::json!({}),
        },
    );
    assert_eq!(joins.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.roster_len(), 0);

    // Broadcast on the same channel keeps flowing.
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    bus.on(
        "cursor",
        Arc::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }),
    );
    bus.send("cursor", serde_json::json!({"x": 1})).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    client.leave_broadcast("roomA").await;
    assert!(!transport.is_subscribed("roomA"));
}

#[tokio::test]
async fn test_unwatch_prevents_further_delivery() {
    let (transport, client) = session();

    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let watch = client
        .watch_entity(
            "room-42",
            EntityType::Comment,
            Arc::new(|_| true),
            WatchHandlers {
                on_insert: Some(Arc::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                })),
                ..WatchHandlers::default()
            },
        )
        .await
        .unwrap();

    transport.inject(
        "room-42",
        ChannelMessage::Change(ChangeEvent::insert(comment("c1", "p1", "hi"))),
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);

    client.unwatch("room-42", &watch).await;
    transport.inject(
        "room-42",
        ChannelMessage::Change(ChangeEvent::insert(comment("c2", "p1", "hi"))),
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
