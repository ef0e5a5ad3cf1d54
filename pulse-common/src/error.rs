//! Error types for the realtime layer

use thiserror::Error;

/// Errors raised by the realtime layer
#[derive(Error, Debug)]
pub enum Error {
    // Transport unreachable. Recovered locally through the channel's
    // connection-state observable; never delivered to a watcher.
    #[error("Transport connection failed: {0}")]
    Connection(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    // Registration-time misuse. Fails loudly at the call site.
    #[error("Subscription error: {0}")]
    Subscription(String),

    // Authoritative write rejected. Always propagated to the caller
    // that initiated the write.
    #[error("Write rejected: {0}")]
    WriteFailed(String),

    #[error("Optimistic entry not found: {0}")]
    EntryNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for realtime operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failed operation can be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::WriteFailed(_))
    }
}
