//! Bounded error history with live subscription.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Endpoint, now_millis};

/// Default number of retained entries.
pub const ERROR_LOG_CAPACITY: usize = 100;

/// One reported error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    /// Error text or serialized payload.
    pub payload: String,
    /// Unix epoch millis.
    pub timestamp: i64,
    /// Context that reported the error.
    pub origin_context: Endpoint,
}

/// Ring buffer of errors; the oldest entry is dropped on overflow.
///
/// New subscribers can replay the retained history and then follow live
/// entries.
pub struct ErrorLog {
    history: RwLock<VecDeque<ErrorEntry>>,
    capacity: usize,
    sender: broadcast::Sender<ErrorEntry>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLog {
    /// Create a log holding [`ERROR_LOG_CAPACITY`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY)
    }

    /// Create a log holding `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(256);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            sender,
        }
    }

    /// Record an error from `origin`.
    pub fn push(&self, origin: Endpoint, payload: impl Into<String>) {
        let entry = ErrorEntry {
            payload: payload.into(),
            timestamp: now_millis(),
            origin_context: origin,
        };
        let _ = self.sender.send(entry.clone()); // live listeners

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop every retained entry.
    pub fn clear(&self) {
        self.history.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Receiver for live entries.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEntry> {
        self.sender.subscribe()
    }

    /// Stream that yields retained entries first, then live ones.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ErrorEntry> {
        let (history, rx) = (self.entries(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
