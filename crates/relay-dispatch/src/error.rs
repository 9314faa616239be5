//! Error types for the dispatch protocol.

use relay_runtime::QueueError;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for dispatch operations.
///
/// A missing query reply is an error here, unlike the receive primitives
/// underneath: the caller asked a question and a deadline passed without an
/// answer.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No reply arrived within {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error(transparent)]
    Queue(QueueError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Build a protocol error for an undecodable or unrecognized request.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Check if the error is a query deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the error is a cancellation, direct or from the transport.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Queue(error) => error.is_cancelled(),
            _ => false,
        }
    }
}

impl From<QueueError> for DispatchError {
    fn from(error: QueueError) -> Self {
        if error.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Queue(error)
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
