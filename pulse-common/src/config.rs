//! Configuration types for the realtime layer

use serde::{Deserialize, Serialize};

/// Realtime layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Seconds a Pending optimistic entry may wait for confirmation
    /// before it is forced to Failed
    pub optimistic_grace_period: u64,
    /// Maximum channels a single session may hold open
    pub max_channels: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            optimistic_grace_period: 30,
            max_channels: 100,
        }
    }
}
