//! Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wave_reader_engine::EngineConfig;

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Quiet period after an inserted matching node before restarting.
    pub structural_debounce_ms: u64,
    /// Quiet period after a style or class change on a matching node.
    pub attribute_debounce_ms: u64,
    pub engine: EngineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            structural_debounce_ms: 50,
            attribute_debounce_ms: 100,
            engine: EngineConfig::default(),
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub const fn structural_debounce(&self) -> Duration {
        Duration::from_millis(self.structural_debounce_ms)
    }

    #[must_use]
    pub const fn attribute_debounce(&self) -> Duration {
        Duration::from_millis(self.attribute_debounce_ms)
    }
}
