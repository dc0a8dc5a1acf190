//! Coordinator errors.

use thiserror::Error;
use wave_reader_core::{ErrorCode, Reply, SelectorError};

use crate::CoordinatorState;

/// Why the coordinator refused a request before dispatching anything.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),
    #[error("No selector provided")]
    MissingSelector,
    #[error("No active tab")]
    NoActiveTab,
    #[error("Operation not allowed while {0}")]
    InvalidState(CoordinatorState),
    #[error("Coordinator is not running")]
    Closed,
}

impl CoordinatorError {
    /// Reply code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSelector(_) | Self::MissingSelector => ErrorCode::Validation,
            Self::NoActiveTab => ErrorCode::NoActiveTab,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Closed => ErrorCode::Internal,
        }
    }

    /// Failed reply carrying this error.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::failure(self.code(), self.to_string())
    }
}

impl From<CoordinatorError> for Reply {
    fn from(e: CoordinatorError) -> Self {
        e.to_reply()
    }
}
