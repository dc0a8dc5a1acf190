//! Wire protocol for cross-context messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;
use wave_reader_core::{
    Endpoint, ErrorCode, Message, Reply, SessionId, TabId, message::KNOWN_KINDS,
};

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownKind(String),
    #[error("Message has no type")]
    MissingKind,
    #[error("Malformed {kind} message: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Reply sent back for a message rejected at the boundary.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        match self {
            Self::UnknownKind(kind) => Reply::unknown_kind(kind),
            _ => Reply::failure(ErrorCode::Validation, self.to_string()),
        }
    }
}

/// Decode the `{"type": ..., ...}` wire form of a message.
///
/// # Errors
/// Returns error for an unknown tag or a payload that does not fit it.
pub fn decode_message(value: Value) -> Result<Message, ProtocolError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingKind)?
        .to_string();
    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownKind(kind));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })
}

/// Decode a full envelope from JSON text.
///
/// # Errors
/// Returns error if the text is not JSON or the message does not decode.
pub fn decode_envelope(json: &str) -> Result<Envelope, ProtocolError> {
    let mut value: Value = serde_json::from_str(json)?;
    let message = value
        .get_mut("message")
        .map(Value::take)
        .ok_or(ProtocolError::MissingKind)?;
    let message = decode_message(message)?;

    let header: Header = serde_json::from_value(value)?;
    Ok(Envelope {
        message,
        origin: header.origin,
        destination: header.destination,
        correlation_id: header.correlation_id.unwrap_or_else(Uuid::new_v4),
        session_id: header.session_id,
        tab_id: header.tab_id,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    origin: Endpoint,
    destination: Endpoint,
    #[serde(default)]
    correlation_id: Option<Uuid>,
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    tab_id: Option<TabId>,
}

/// Message plus routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Typed payload.
    pub message: Message,
    /// Sending context.
    pub origin: Endpoint,
    /// Receiving context.
    pub destination: Endpoint,
    /// Echoed by the reply.
    pub correlation_id: Uuid,
    /// Session the message refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Tab the message targets; the active tab when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

impl Envelope {
    /// Create an envelope with a fresh correlation id.
    #[must_use]
    pub fn new(origin: Endpoint, destination: Endpoint, message: Message) -> Self {
        Self {
            message,
            origin,
            destination,
            correlation_id: Uuid::new_v4(),
            session_id: None,
            tab_id: None,
        }
    }

    /// Target a specific tab.
    #[must_use]
    pub fn with_tab(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Tag with a session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Wire tag of the payload.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.message.kind()
    }
}

/// Reply slot for one delivery.
///
/// Once the receiving context has taken the delivery from its inbox,
/// dropping the slot unanswered acknowledges the message with a bare
/// success. A slot dropped while still queued, or while its handler is
/// unwinding from a panic, sends nothing and the caller sees the request as
/// unreachable.
#[derive(Debug)]
pub struct Responder {
    correlation_id: Uuid,
    tx: Option<oneshot::Sender<Reply>>,
    armed: bool,
}

impl Responder {
    pub(crate) const fn new(correlation_id: Uuid, tx: oneshot::Sender<Reply>) -> Self {
        Self {
            correlation_id,
            tx: Some(tx),
            armed: false,
        }
    }

    /// Mark the delivery as handed to its handler.
    pub(crate) const fn arm(&mut self) {
        self.armed = true;
    }

    /// Correlation id the reply will echo.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Send the reply. A caller that already gave up is ignored.
    pub fn respond(mut self, reply: Reply) {
        self.send(reply);
    }

    fn send(&mut self, reply: Reply) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if tx.send(reply.with_correlation(self.correlation_id)).is_err() {
            tracing::debug!(correlation_id = %self.correlation_id, "caller went away before reply");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.armed && !std::thread::panicking() {
            self.send(Reply::ok());
        }
    }
}

/// Message handed to a context, with its reply slot.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub responder: Responder,
}

impl Delivery {
    /// Typed payload.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.envelope.message
    }

    /// Answer the message.
    pub fn respond(self, reply: Reply) {
        self.responder.respond(reply);
    }

    /// Split into envelope and reply slot.
    #[must_use]
    pub fn into_parts(self) -> (Envelope, Responder) {
        (self.envelope, self.responder)
    }
}
