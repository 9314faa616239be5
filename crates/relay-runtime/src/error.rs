//! Error types for queue operations.

use crate::provider::NativeStatus;
use thiserror::Error;

/// Comprehensive error type for all queue operations.
///
/// Timeouts are deliberately absent: receive primitives report an elapsed
/// timeout as `Ok(None)`, never as an error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Provider returned {status} during {operation}")]
    Provider {
        status: NativeStatus,
        operation: &'static str,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Queue handle is closed")]
    HandleClosed,

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Transaction error: {message}")]
    Transaction { message: String },
}

impl QueueError {
    /// Build a provider error from a fatal native status.
    pub fn provider(status: NativeStatus, operation: &'static str) -> Self {
        Self::Provider { status, operation }
    }

    /// Check if the error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Get the native status for provider faults.
    pub fn provider_status(&self) -> Option<&NativeStatus> {
        match self {
            Self::Provider { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Errors raised while parsing queue names or message-id text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Malformed queue name '{input}': {message}")]
    QueueName { input: String, message: String },

    #[error("Malformed message id '{input}': {message}")]
    MessageId { input: String, message: String },
}

impl FormatError {
    pub fn queue_name(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueName {
            input: input.into(),
            message: message.into(),
        }
    }

    pub fn message_id(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MessageId {
            input: input.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
