//! Closed message model exchanged between contexts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Settings, SettingsPatch, TabId};

/// Addressable context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "context", content = "tabId", rename_all = "snake_case")]
pub enum Endpoint {
    /// User-facing control surface (popup, settings page).
    ControlSurface,
    /// Long-lived coordinator.
    Coordinator,
    /// Execution agent injected into one tab.
    Agent(TabId),
}

impl Endpoint {
    /// Whether this endpoint is an execution agent.
    #[must_use]
    pub const fn is_agent(&self) -> bool {
        matches!(self, Self::Agent(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlSurface => f.write_str("control-surface"),
            Self::Coordinator => f.write_str("coordinator"),
            Self::Agent(tab) => write!(f, "agent:{tab}"),
        }
    }
}

/// Event pushed to the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notice {
    /// A tab holding a session finished navigating.
    TabNavigated {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    /// A tab holding a session was closed.
    SessionEnded {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    /// A dispatched operation failed.
    OperationFailed {
        operation: String,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
        error: String,
    },
    /// The coordinator moved to a new state.
    StateChanged { state: String },
}

/// Message exchanged between contexts.
///
/// Serialized as `{"type": "START_WAVE_READER", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Start waving the given selector (or the current one).
    StartWaveReader {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<SettingsPatch>,
    },
    /// Stop waving.
    StopWaveReader,
    /// Pause waving, keeping the selector.
    PauseWaveReader,
    /// Resume a paused wave.
    ResumeWaveReader,
    /// Merge a settings patch.
    UpdateSettings { settings: SettingsPatch },
    /// Change the current selector.
    SelectorUpdated { selector: String },
    /// Add a selector to the registry.
    SelectorAdded { selector: String },
    /// Remove a selector from the registry.
    SelectorRemoved { selector: String },
    /// Selector picked on the page and confirmed by the user.
    SelectionConfirmed { selector: String },
    /// Full settings replacement.
    SettingsUpdated { settings: Settings },
    /// Restore default settings.
    SettingsReset,
    /// Error report from any context.
    ErrorReported {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Coordinator status query.
    WaveReaderStatus,
    /// Agent status query.
    GetStatus,
    /// Replay the operation that failed the coordinator.
    RetryLastOperation,
    /// Return the coordinator to idle and drop all sessions.
    ResetCoordinator,
    /// Notification for the control surface.
    Notify { notice: Notice },
}

/// Every wire tag the protocol knows.
pub const KNOWN_KINDS: &[&str] = &[
    "START_WAVE_READER",
    "STOP_WAVE_READER",
    "PAUSE_WAVE_READER",
    "RESUME_WAVE_READER",
    "UPDATE_SETTINGS",
    "SELECTOR_UPDATED",
    "SELECTOR_ADDED",
    "SELECTOR_REMOVED",
    "SELECTION_CONFIRMED",
    "SETTINGS_UPDATED",
    "SETTINGS_RESET",
    "ERROR_REPORTED",
    "WAVE_READER_STATUS",
    "GET_STATUS",
    "RETRY_LAST_OPERATION",
    "RESET_COORDINATOR",
    "NOTIFY",
];

impl Message {
    /// Wire tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartWaveReader { .. } => "START_WAVE_READER",
            Self::StopWaveReader => "STOP_WAVE_READER",
            Self::PauseWaveReader => "PAUSE_WAVE_READER",
            Self::ResumeWaveReader => "RESUME_WAVE_READER",
            Self::UpdateSettings { .. } => "UPDATE_SETTINGS",
            Self::SelectorUpdated { .. } => "SELECTOR_UPDATED",
            Self::SelectorAdded { .. } => "SELECTOR_ADDED",
            Self::SelectorRemoved { .. } => "SELECTOR_REMOVED",
            Self::SelectionConfirmed { .. } => "SELECTION_CONFIRMED",
            Self::SettingsUpdated { .. } => "SETTINGS_UPDATED",
            Self::SettingsReset => "SETTINGS_RESET",
            Self::ErrorReported { .. } => "ERROR_REPORTED",
            Self::WaveReaderStatus => "WAVE_READER_STATUS",
            Self::GetStatus => "GET_STATUS",
            Self::RetryLastOperation => "RETRY_LAST_OPERATION",
            Self::ResetCoordinator => "RESET_COORDINATOR",
            Self::Notify { .. } => "NOTIFY",
        }
    }

    /// Whether a context of the given kind handles this message.
    #[must_use]
    pub const fn accepted_by(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::ControlSurface => matches!(self, Self::Notify { .. }),
            Endpoint::Coordinator => !matches!(self, Self::GetStatus | Self::Notify { .. }),
            Endpoint::Agent(_) => matches!(
                self,
                Self::StartWaveReader { .. }
                    | Self::StopWaveReader
                    | Self::PauseWaveReader
                    | Self::ResumeWaveReader
                    | Self::SettingsUpdated { .. }
                    | Self::SelectorUpdated { .. }
                    | Self::GetStatus
            ),
        }
    }

    /// Whether handling this message may change a session.
    #[must_use]
    pub const fn mutates_session(&self) -> bool {
        matches!(
            self,
            Self::StartWaveReader { .. }
                | Self::StopWaveReader
                | Self::PauseWaveReader
                | Self::ResumeWaveReader
        )
    }
}

/// Failure category carried by a failed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    NoActiveTab,
    Unreachable,
    Timeout,
    Cancelled,
    ElementsNotFound,
    UnknownMessage,
    InvalidState,
    Superseded,
    Internal,
}

impl ErrorCode {
    /// Failures expected to clear up on their own.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Unreachable | Self::Timeout | Self::Cancelled)
    }
}

/// Reply to any handled message.
///
/// Serialized as `{"success": true, ...data}` or
/// `{"success": false, "error": "...", "code": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Reply {
    /// Bare success, also used as the implicit acknowledgment.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            correlation_id: None,
            data: Map::new(),
        }
    }

    /// Success carrying data. Objects are flattened into the reply,
    /// anything else lands under `data`.
    #[must_use]
    pub fn ok_with(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self { data, ..Self::ok() }
    }

    /// Success for a request that found nothing to do.
    #[must_use]
    pub fn noop() -> Self {
        Self::ok_with(serde_json::json!({ "noop": true }))
    }

    /// Structured failure.
    #[must_use]
    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            code: Some(code),
            correlation_id: None,
            data: Map::new(),
        }
    }

    /// Failure for a tag the receiver does not handle.
    #[must_use]
    pub fn unknown_kind(kind: &str) -> Self {
        Self::failure(ErrorCode::UnknownMessage, format!("Unknown message type: {kind}"))
    }

    /// Attach the correlation id being answered.
    #[must_use]
    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Whether this reply is a no-op success.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.success && self.data.get("noop").and_then(Value::as_bool) == Some(true)
    }

    /// Data field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
