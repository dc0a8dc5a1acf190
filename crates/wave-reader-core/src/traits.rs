//! Session types and the host traits the contexts run against.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::Settings;

/// Browser tab identifier.
pub type TabId = u32;

/// Session identifier.
pub type SessionId = Uuid;

/// Animation state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    /// Known to the coordinator but never started.
    Idle,
    /// Engine running in the tab.
    Waving,
    /// Engine halted, selector kept.
    Paused,
    /// Stopped by request.
    Stopped,
    /// Last command against the tab failed.
    Error,
}

impl AnimationState {
    /// States from which STOP has nothing left to do.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

/// Per-tab wave session, owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Tab the session lives in.
    pub tab_id: TabId,
    /// Selector being waved.
    pub selector: String,
    /// Current animation state.
    pub animation_state: AnimationState,
    /// Start timestamp (Unix epoch millis).
    pub started_at: i64,
    /// Settings in effect when the session started or was last updated.
    pub options_snapshot: Settings,
    /// Generation of the last command dispatched to the tab.
    pub generation: u64,
}

impl Session {
    /// Create a waving session.
    #[must_use]
    pub fn waving(tab_id: TabId, selector: String, options: Settings, generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tab_id,
            selector,
            animation_state: AnimationState::Waving,
            started_at: now_millis(),
            options_snapshot: options,
            generation,
        }
    }
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Stored value for '{key}' is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Best-effort key-value store provided by the host.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Write a value.
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// Host view of the browser's tabs.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Tab the user is looking at, if any.
    async fn active_tab(&self) -> Option<TabId>;
}
