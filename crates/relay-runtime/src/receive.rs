//! The asynchronous receive state machine.
//!
//! One [`ReceiveOperation`] performs one peek or consume against a
//! connection, hiding the provider's overflow/stale/cancellation mechanics
//! behind a single present-or-absent result:
//!
//! - buffer overflow: grow the package via its size hints and retry the
//!   same cursor position (a peek-next is retried as peek-current so the
//!   message is not skipped while buffers grow);
//! - stale handle: close and reopen the connection's read handle, retry;
//! - timeout: resolve to `Ok(None)`; absence is a valid outcome, never an
//!   error;
//! - cancellation: close the read handle to fail the pending native call
//!   fast, resolve as `Err(Cancelled)` exactly once;
//! - any other fatal status: resolve as a provider error.

use crate::connection::QueueConnection;
use crate::error::QueueError;
use crate::message::{Message, PropertyFilter};
use crate::provider::{
    NativeStatus, RawCursorHandle, ReceiveAction, ReceiveOutcome, TransactionToken,
    INFINITE_TIMEOUT,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Retry budget for transparent stale-handle recovery. Reacquisition
/// failures past this point surface as provider errors.
const MAX_STALE_RETRIES: u32 = 5;

/// Parameters for one receive or peek.
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub action: ReceiveAction,
    pub timeout: Duration,
    pub filter: PropertyFilter,
    pub cursor: Option<RawCursorHandle>,
    pub transaction: Option<TransactionToken>,
}

impl ReceiveRequest {
    /// A consuming receive with the standard property set.
    pub fn receive() -> Self {
        Self {
            action: ReceiveAction::Receive,
            timeout: INFINITE_TIMEOUT,
            filter: PropertyFilter::default(),
            cursor: None,
            transaction: None,
        }
    }

    /// A non-destructive peek at the front of the queue.
    pub fn peek() -> Self {
        Self {
            action: ReceiveAction::PeekCurrent,
            ..Self::receive()
        }
    }

    pub fn with_action(mut self, action: ReceiveAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_filter(mut self, filter: PropertyFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_cursor(mut self, cursor: RawCursorHandle) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionToken) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

/// A single asynchronous receive against a connection.
pub struct ReceiveOperation<'a> {
    connection: &'a QueueConnection,
    request: ReceiveRequest,
}

impl<'a> ReceiveOperation<'a> {
    pub fn new(connection: &'a QueueConnection, request: ReceiveRequest) -> Self {
        Self {
            connection,
            request,
        }
    }

    /// Drive the operation to its terminal resolution.
    pub async fn run(self, cancel: &CancellationToken) -> Result<Option<Message>, QueueError> {
        let ReceiveRequest {
            mut action,
            timeout,
            filter,
            cursor,
            transaction,
        } = self.request;
        let connection = self.connection;

        let mut package = filter.request_marshal().pack();
        let mut stale_retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let handle = connection.read_handle()?;
            let raw = handle.raw()?;
            let outcome = connection.provider().begin_receive(
                raw,
                cursor,
                action,
                timeout,
                transaction,
                package,
            );

            let (status, returned) = match outcome {
                ReceiveOutcome::Completed(status, package) => {
                    trace!(queue = %connection.name(), %status, "receive completed synchronously");
                    (status, package)
                }
                ReceiveOutcome::Pending(mut completion) => {
                    tokio::select! {
                        result = &mut completion => match result {
                            Ok(resolved) => resolved,
                            // A dropped completion means the provider tore
                            // the operation down; treat as cancellation.
                            Err(_) => return Err(QueueError::Cancelled),
                        },
                        _ = cancel.cancelled() => {
                            // Closing the read handle is the only
                            // provider-safe way to unblock a pending call.
                            connection.close_read();
                            match completion.await {
                                Ok(resolved) => resolved,
                                Err(_) => return Err(QueueError::Cancelled),
                            }
                        }
                    }
                }
            };
            package = returned;

            match status {
                NativeStatus::BufferOverflow => {
                    if !package.adjust() {
                        // The size hints were unusable; retrying would loop.
                        return Err(QueueError::provider(status, "receive"));
                    }
                    // A peek-next already advanced the cursor; retrying it
                    // verbatim would skip the message whose buffers we just
                    // grew.
                    if action == ReceiveAction::PeekNext {
                        action = ReceiveAction::PeekCurrent;
                    }
                    debug!(queue = %connection.name(), "buffers grown after overflow, retrying");
                }
                NativeStatus::StaleHandle => {
                    stale_retries += 1;
                    if stale_retries > MAX_STALE_RETRIES {
                        return Err(QueueError::provider(status, "receive"));
                    }
                    connection.invalidate_read();
                }
                NativeStatus::IoTimeout => return Ok(None),
                NativeStatus::OperationCancelled => return Err(QueueError::Cancelled),
                NativeStatus::Fatal(_) => {
                    return Err(QueueError::provider(status, "receive"));
                }
                NativeStatus::Ok | NativeStatus::Info(_) => {
                    let message = Message::from_marshal(package.unpack(), &filter)?;
                    return Ok(Some(message));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "receive_tests.rs"]
mod tests;
