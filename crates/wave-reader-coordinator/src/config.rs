//! Coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Queued host commands (tab events, status queries) before senders wait.
    pub command_capacity: usize,
    /// Attempts per key-value write.
    pub persist_attempts: u32,
    /// Backoff step between key-value write attempts.
    pub persist_backoff_ms: u64,
    /// Retained error reports.
    pub error_log_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            persist_attempts: 3,
            persist_backoff_ms: 50,
            error_log_capacity: wave_reader_core::error_log::ERROR_LOG_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    #[must_use]
    pub const fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }
}
