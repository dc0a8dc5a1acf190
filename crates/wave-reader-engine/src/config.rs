//! Engine tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Pointer displacement below which a recompute is skipped.
    pub movement_threshold_px: f64,
    /// Parameter change below which an element is not rewritten.
    pub change_epsilon: f64,
    /// Translation at full pointer distance, in percent of element size.
    pub max_translate_pct: f64,
    /// Stylesheet write attempts per element per frame.
    pub write_attempts: u32,
    /// Backoff step between write attempts.
    pub write_backoff_ms: u64,
    /// Recomputes between diagnostic log lines.
    pub stats_log_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            movement_threshold_px: 5.0,
            change_epsilon: 0.1,
            max_translate_pct: 10.0,
            write_attempts: 3,
            write_backoff_ms: 100,
            stats_log_interval: 100,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn write_backoff(&self) -> Duration {
        Duration::from_millis(self.write_backoff_ms)
    }
}
