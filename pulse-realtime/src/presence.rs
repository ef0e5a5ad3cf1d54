//! Presence tracking
//!
//! Room-scoped roster of connected participants. The tracker moves from
//! Unsynced through Syncing to Synced; once synced it holds a full roster
//! snapshot and applies join/leave deltas idempotently. A participant
//! appears at most once no matter how many connections they hold.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_common::Result;

use crate::hooks::{HookHandle, Hooks};
use crate::transport::{ChannelMessage, Transport};

/// One participant's presence in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub participant_id: String,
    /// Arbitrary caller metadata, last write wins
    pub metadata: serde_json::Value,
    pub joined_at: DateTime<Utc>,
}

/// Roster synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unsynced,
    Syncing,
    Synced,
}

/// Receives the complete roster on every sync
pub type SyncCallback = dyn Fn(&[PresenceRecord]) + Send + Sync;
/// Receives each newly joined participant
pub type JoinCallback = dyn Fn(&PresenceRecord) + Send + Sync;
/// Receives each departed participant
pub type LeaveCallback = dyn Fn(&PresenceRecord) + Send + Sync;

/// Tracks the roster for one room
pub struct PresenceTracker {
    room: String,
    transport: Arc<dyn Transport>,
    state: RwLock<SyncState>,
    roster: RwLock<HashMap<String, PresenceRecord>>,
    sync_hooks: Hooks<SyncCallback>,
    join_hooks: Hooks<JoinCallback>,
    leave_hooks: Hooks<LeaveCallback>,
}

impl PresenceTracker {
    /// Create a tracker for `room`; announcements publish on the
    /// channel of the same name
    pub fn new(room: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            room: room.to_string(),
            transport,
            state: RwLock::new(SyncState::Unsynced),
            roster: RwLock::new(HashMap::new()),
            sync_hooks: Hooks::new(),
            join_hooks: Hooks::new(),
            leave_hooks: Hooks::new(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn sync_state(&self) -> SyncState {
        *self.state.read()
    }

    /// Mark the tracker as awaiting its roster snapshot (channel opened)
    pub fn begin_sync(&self) {
        *self.state.write() = SyncState::Syncing;
    }

    /// Drop back to Unsynced after a disconnect. The stale roster is kept
    /// for display until the next sync replaces it; callers must
    /// re-announce their own presence with [`track`](Self::track).
    pub fn reset(&self) {
        *self.state.write() = SyncState::Unsynced;
    }

    /// Announce local presence in the room. Not re-announced
    /// automatically after a reconnect.
    pub async fn track(
        &self,
        participant_id: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        debug!(room = %self.room, participant = participant_id, "announcing presence");
        self.transport
            .publish(
                &self.room,
                ChannelMessage::PresenceJoin {
                    participant_id: participant_id.to_string(),
                    metadata,
                },
            )
            .await
    }

    /// Withdraw local presence from the room
    pub async fn untrack(&self, participant_id: &str) -> Result<()> {
        self.transport
            .publish(
                &self.room,
                ChannelMessage::PresenceLeave {
                    participant_id: participant_id.to_string(),
                },
            )
            .await
    }

    /// Apply one inbound presence message. Joins and leaves are
    /// idempotent deltas; a sync replaces the whole roster.
    pub fn apply(&self, message: &ChannelMessage) {
        match message {
            ChannelMessage::PresenceSync { roster } => self.apply_sync(roster),
            ChannelMessage::PresenceJoin {
                participant_id,
                metadata,
            } => self.apply_join(participant_id, metadata.clone()),
            ChannelMessage::PresenceLeave { participant_id } => {
                self.apply_leave(participant_id);
            }
            _ => {}
        }
    }

    fn apply_sync(&self, records: &[PresenceRecord]) {
        {
            let mut roster = self.roster.write();
            roster.clear();
            for record in records {
                // Keyed by participant: a duplicate in the snapshot
                // collapses to the last occurrence.
                roster.insert(record.participant_id.clone(), record.clone());
            }
            *self.state.write() = SyncState::Synced;
        }
        let snapshot = self.roster_snapshot();
        debug!(room = %self.room, size = snapshot.len(), "roster synced");
        self.sync_hooks.emit(|hook| hook(&snapshot));
    }

    fn apply_join(&self, participant_id: &str, metadata: serde_json::Value) {
        let joined = {
            let mut roster = self.roster.write();
            match roster.get_mut(participant_id) {
                Some(existing) => {
                    // Re-join from another connection: refresh metadata,
                    // never duplicate.
                    existing.metadata = metadata;
                    None
                }
                None => {
                    let record = PresenceRecord {
                        participant_id: participant_id.to_string(),
                        metadata,
                        joined_at: Utc::now(),
                    };
                    roster.insert(participant_id.to_string(), record.clone());
                    Some(record)
                }
            }
        };
        if let Some(record) = joined {
            self.join_hooks.emit(|hook| hook(&record));
        }
    }

    fn apply_leave(&self, participant_id: &str) {
        let removed = self.roster.write().remove(participant_id);
        if let Some(record) = removed {
            self.leave_hooks.emit(|hook| hook(&record));
        }
    }

    /// Current roster contents
    pub fn roster(&self) -> Vec<PresenceRecord> {
        self.roster_snapshot()
    }

    pub fn roster_len(&self) -> usize {
        self.roster.read().len()
    }

    fn roster_snapshot(&self) -> Vec<PresenceRecord> {
        self.roster.read().values().cloned().collect()
    }

    /// Observe roster syncs; the callback always receives the complete
    /// roster so callers reconcile instead of applying deltas blindly
    pub fn on_sync(&self, callback: Arc<SyncCallback>) -> HookHandle {
        self.sync_hooks.add(callback)
    }

    /// Observe newly joined participants
    pub fn on_join(&self, callback: Arc<JoinCallback>) -> HookHandle {
        self.join_hooks.add(callback)
    }

    /// Observe departures
    pub fn on_leave(&self, callback: Arc<LeaveCallback>) -> HookHandle {
        self.leave_hooks.add(callback)
    }

    pub fn off_sync(&self, handle: &HookHandle) {
        self.sync_hooks.remove(handle);
    }

    pub fn off_join(&self, handle: &HookHandle) {
        self.join_hooks.remove(handle);
    }

    pub fn off_leave(&self, handle: &HookHandle) {
        self.leave_hooks.remove(handle);
    }
}
