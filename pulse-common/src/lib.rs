//! Shared foundation for the Pulse realtime layer
//!
//! Provides the pieces every realtime component depends on:
//! - Error taxonomy and `Result` alias
//! - Configuration types
//! - Entity payloads carried by change events

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::RealtimeConfig;
pub use error::{Error, Result};
pub use types::{
    CommentRecord, EntityPayload, EntityType, NotificationRecord, PostRecord,
};
