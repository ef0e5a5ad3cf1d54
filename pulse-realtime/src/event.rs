//! Change events emitted by the authoritative store
//!
//! A change event describes one persisted mutation: which entity changed,
//! how, and the payload before and after. Events are validated at the
//! router boundary before any watcher sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pulse_common::{EntityPayload, EntityType, Error, Result};

/// Kind of persisted mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A notification that a persisted entity was inserted, updated or deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of change
    pub kind: ChangeKind,
    /// Entity type the change applies to
    pub entity_type: EntityType,
    /// Id of the affected entity
    pub entity_id: String,
    /// Payload before the change (UPDATE and DELETE)
    pub old: Option<EntityPayload>,
    /// Payload after the change (INSERT and UPDATE)
    pub new: Option<EntityPayload>,
    /// When the store committed the change
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create an INSERT event
    pub fn insert(new: EntityPayload) -> Self {
        Self {
            kind: ChangeKind::Insert,
            entity_type: new.entity_type(),
            entity_id: new.entity_id().to_string(),
            old: None,
            new: Some(new),
            timestamp: Utc::now(),
        }
    }

    /// Create an UPDATE event
    pub fn update(old: EntityPayload, new: EntityPayload) -> Self {
        Self {
            kind: ChangeKind::Update,
            entity_type: new.entity_type(),
            entity_id: new.entity_id().to_string(),
            old: Some(old),
            new: Some(new),
            timestamp: Utc::now(),
        }
    }

    /// Create a DELETE event
    pub fn delete(old: EntityPayload) -> Self {
        Self {
            kind: ChangeKind::Delete,
            entity_type: old.entity_type(),
            entity_id: old.entity_id().to_string(),
            old: Some(old),
            new: None,
            timestamp: Utc::now(),
        }
    }

    /// Validate shape at the router boundary: payload presence must match
    /// the kind, and payload tags must agree with the declared entity type.
    pub fn validate(&self) -> Result<()> {
        let shape_ok = match self.kind {
            ChangeKind::Insert => self.new.is_some(),
            ChangeKind::Update => self.old.is_some() && self.new.is_some(),
            ChangeKind::Delete => self.old.is_some(),
        };
        if !shape_ok {
            return Err(Error::Subscription(format!(
                "malformed {:?} event for {}",
                self.kind, self.entity_id
            )));
        }
        for payload in [self.old.as_ref(), self.new.as_ref()].into_iter().flatten() {
            if payload.entity_type() != self.entity_type {
                return Err(Error::Subscription(format!(
                    "payload tag {} does not match declared entity type {}",
                    payload.entity_type().as_str(),
                    self.entity_type.as_str()
                )));
            }
        }
        Ok(())
    }
}
