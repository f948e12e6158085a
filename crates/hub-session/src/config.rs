//! Session tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the session actor and hotplug watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on a single write
    pub write_timeout_ms: u64,
    /// Capacity of the façade command channel
    pub command_buffer: usize,
    /// How often the hotplug watcher enumerates devices
    pub hotplug_poll_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 1000,
            command_buffer: 64,
            hotplug_poll_ms: 500,
        }
    }
}

impl SessionConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn hotplug_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms.max(10))
    }
}
