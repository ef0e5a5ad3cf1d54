//! Entity payloads carried by change events
//!
//! Payloads are modeled as tagged variants per entity type with explicit
//! fields, validated at the router boundary rather than passed through as
//! loose JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity types distributed through the realtime layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Comment,
    Post,
    Notification,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Post => "post",
            Self::Notification => "notification",
        }
    }
}

// ============================================================================
// Entity Records
// ============================================================================

/// A comment on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub body: String,
    /// Client-issued idempotency token, echoed back by the store.
    /// Used to correlate authoritative inserts with optimistic entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A shared post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user-scoped notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    /// Entity this notification points at (e.g. a comment id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tagged Payload
// ============================================================================

/// An entity payload, tagged by entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityPayload {
    Comment(CommentRecord),
    Post(PostRecord),
    Notification(NotificationRecord),
}

impl EntityPayload {
    /// The entity type this payload belongs to
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Comment(_) => EntityType::Comment,
            Self::Post(_) => EntityType::Post,
            Self::Notification(_) => EntityType::Notification,
        }
    }

    /// The entity's id
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Comment(c) => &c.id,
            Self::Post(p) => &p.id,
            Self::Notification(n) => &n.id,
        }
    }

    /// The client-issued idempotency token, if the entity carries one
    pub fn client_token(&self) -> Option<&str> {
        match self {
            Self::Comment(c) => c.client_token.as_deref(),
            Self::Post(p) => p.client_token.as_deref(),
            Self::Notification(_) => None,
        }
    }

    /// Stamp a client token onto the payload. No-op for entity types
    /// that are never written optimistically.
    pub fn set_client_token(&mut self, token: &str) {
        match self {
            Self::Comment(c) => c.client_token = Some(token.to_string()),
            Self::Post(p) => p.client_token = Some(token.to_string()),
            Self::Notification(_) => {}
        }
    }

    /// Overwrite the entity id (used when the store assigns the
    /// authoritative id)
    pub fn set_entity_id(&mut self, id: &str) {
        match self {
            Self::Comment(c) => c.id = id.to_string(),
            Self::Post(p) => p.id = id.to_string(),
            Self::Notification(n) => n.id = id.to_string(),
        }
    }
}
