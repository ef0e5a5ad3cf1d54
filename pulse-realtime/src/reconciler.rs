//! Optimistic mutation reconciler
//!
//! Shows local provisional entities immediately and replaces them with
//! authoritative records once the store confirms the write, either
//! synchronously from the write response or later from the change stream.
//! Correlation uses a client-issued idempotency token echoed back by the
//! store. The displayed list never holds both the optimistic and the
//! authoritative version of one logical entity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_common::{EntityPayload, EntityType, Error, RealtimeConfig, Result};

use crate::event::{ChangeEvent, ChangeKind};
use crate::transport::Store;

/// Lifecycle of an optimistic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A client-local provisional representation of an unconfirmed write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimisticEntry {
    /// Temporary id, `local-` prefixed so it never collides with the
    /// server id space
    pub local_id: String,
    pub entity_type: EntityType,
    pub payload: EntityPayload,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    /// Write failure message, surfaced for the retry affordance
    pub error: Option<String>,
    /// Authoritative id once confirmed
    pub server_id: Option<String>,
    /// Idempotency token stamped into the payload before the write
    pub client_token: Option<String>,
}

/// Maintains the optimistic display list for one session
pub struct Reconciler {
    store: Arc<dyn Store>,
    grace: Duration,
    entries: RwLock<Vec<OptimisticEntry>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, config: &RealtimeConfig) -> Self {
        Self {
            store,
            grace: Duration::seconds(i64::try_from(config.optimistic_grace_period).unwrap_or(30)),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Insert a provisional entry into the display list immediately,
    /// returning its temporary id. The write itself is issued by
    /// [`commit`](Self::commit).
    pub fn add(&self, mut payload: EntityPayload) -> String {
        let local_id = format!("local-{}", Uuid::new_v4());
        let token = Uuid::new_v4().to_string();
        payload.set_entity_id(&local_id);
        payload.set_client_token(&token);

        let entry = OptimisticEntry {
            local_id: local_id.clone(),
            entity_type: payload.entity_type(),
            payload,
            status: EntryStatus::Pending,
            created_at: Utc::now(),
            error: None,
            server_id: None,
            client_token: Some(token),
        };
        self.entries.write().push(entry);
        local_id
    }

    /// Issue the authoritative write for a Pending entry. On success the
    /// entry is replaced in place with the confirmed record; on failure it
    /// transitions to Failed and the error is propagated to the caller.
    pub async fn commit(&self, local_id: &str) -> Result<EntityPayload> {
        let (entity_type, payload) = {
            let entries = self.entries.read();
            let entry = entries
                .iter()
                .find(|e| e.local_id == local_id && e.status == EntryStatus::Pending)
                .ok_or_else(|| Error::EntryNotFound(local_id.to_string()))?;
            (entry.entity_type, entry.payload.clone())
        };

        match self.store.write(entity_type, payload).await {
            Ok(record) => {
                self.confirm(local_id, &record);
                Ok(record)
            }
            Err(e) => {
                warn!(local_id, error = %e, "authoritative write failed");
                self.fail(local_id, &e.to_string());
                Err(e)
            }
        }
    }

    /// Re-issue the write for a Failed entry
    pub async fn retry(&self, local_id: &str) -> Result<EntityPayload> {
        {
            let mut entries = self.entries.write();
            let entry = entries
                .iter_mut()
                .find(|e| e.local_id == local_id && e.status == EntryStatus::Failed)
                .ok_or_else(|| Error::EntryNotFound(local_id.to_string()))?;
            entry.status = EntryStatus::Pending;
            entry.error = None;
            // Restart the confirmation clock.
            entry.created_at = Utc::now();
        }
        self.commit(local_id).await
    }

    /// Reconcile an authoritative insert from the change stream.
    ///
    /// Match order: a server id already confirmed is a no-op merge; a
    /// matching client token replaces the pending entry in place; no match
    /// degrades to a plain new confirmed entry, never an error.
    pub fn apply_insert(&self, event: &ChangeEvent) {
        if event.kind != ChangeKind::Insert {
            return;
        }
        let Some(record) = event.new.as_ref() else {
            return;
        };

        let mut entries = self.entries.write();

        if entries
            .iter()
            .any(|e| e.server_id.as_deref() == Some(event.entity_id.as_str()))
        {
            debug!(entity = %event.entity_id, "duplicate insert, merged as no-op");
            return;
        }

        let token = record.client_token();
        if let Some(entry) = entries.iter_mut().find(|e| {
            e.status != EntryStatus::Confirmed
                && token.is_some()
                && e.client_token.as_deref() == token
        }) {
            entry.payload = record.clone();
            entry.status = EntryStatus::Confirmed;
            entry.server_id = Some(event.entity_id.clone());
            entry.error = None;
            return;
        }

        // Reconciliation mismatch: an authoritative record we never wrote
        // optimistically. Shown as a plain new entry.
        debug!(entity = %event.entity_id, "no optimistic match, inserting authoritative record");
        entries.push(OptimisticEntry {
            local_id: event.entity_id.clone(),
            entity_type: record.entity_type(),
            payload: record.clone(),
            status: EntryStatus::Confirmed,
            created_at: event.timestamp,
            error: None,
            server_id: Some(event.entity_id.clone()),
            client_token: None,
        });
    }

    /// Force entries Pending longer than the grace period to Failed,
    /// returning their ids. Callers schedule this sweep.
    pub fn expire_pending(&self) -> Vec<String> {
        let cutoff = Utc::now() - self.grace;
        let mut expired = Vec::new();
        for entry in self.entries.write().iter_mut() {
            if entry.status == EntryStatus::Pending && entry.created_at < cutoff {
                entry.status = EntryStatus::Failed;
                entry.error = Some("confirmation timed out".to_string());
                expired.push(entry.local_id.clone());
            }
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "pending entries expired");
        }
        expired
    }

    /// Dismiss an entry (typically a Failed one the user gave up on)
    pub fn remove(&self, local_id: &str) {
        self.entries.write().retain(|e| e.local_id != local_id);
    }

    /// The display list, in insertion order
    pub fn entries(&self) -> Vec<OptimisticEntry> {
        self.entries.read().clone()
    }

    pub fn entry(&self, local_id: &str) -> Option<OptimisticEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.local_id == local_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn confirm(&self, local_id: &str, record: &EntityPayload) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.local_id == local_id) {
            entry.payload = record.clone();
            entry.status = EntryStatus::Confirmed;
            entry.server_id = Some(record.entity_id().to_string());
            entry.error = None;
        }
    }

    fn fail(&self, local_id: &str, message: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.local_id == local_id) {
            entry.status = EntryStatus::Failed;
            entry.error = Some(message.to_string());
        }
    }
}
