//! Agent errors.

use thiserror::Error;
use wave_reader_core::{DomError, ErrorCode, Reply, SelectorError};

/// Why the agent refused a command.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),
    #[error("No selector provided")]
    MissingSelector,
    #[error("No elements found matching selector: {0}")]
    ElementsNotFound(String),
    #[error("Document error: {0}")]
    Dom(#[from] DomError),
}

impl AgentError {
    /// Reply code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSelector(_) | Self::MissingSelector => ErrorCode::Validation,
            Self::ElementsNotFound(_) => ErrorCode::ElementsNotFound,
            Self::Dom(DomError::InvalidSelector(_) | DomError::Unsupported(_)) => ErrorCode::Validation,
            Self::Dom(_) => ErrorCode::Internal,
        }
    }

    /// Failed reply carrying this error.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::failure(self.code(), self.to_string())
    }
}
