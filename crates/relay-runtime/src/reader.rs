//! Queue reading: peek, receive, and the correlation scan.

use crate::connection::QueueConnection;
use crate::error::QueueError;
use crate::message::{Message, MessageId, PropertyFilter};
use crate::provider::{RawCursorHandle, ReceiveAction, INFINITE_TIMEOUT};
use crate::receive::{ReceiveOperation, ReceiveRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A stateful position marker into a queue, enabling ordered peeks without
/// reacquiring an implicit position. Closed on drop.
pub struct QueueCursor {
    connection: Arc<QueueConnection>,
    raw: RawCursorHandle,
}

impl QueueCursor {
    /// Open a private cursor on the connection's read handle.
    pub fn open(connection: Arc<QueueConnection>) -> Result<Self, QueueError> {
        let handle = connection.read_handle()?;
        let raw = connection
            .provider()
            .create_cursor(handle.raw()?)
            .map_err(|status| QueueError::provider(status, "create cursor"))?;
        Ok(Self { connection, raw })
    }

    pub fn raw(&self) -> RawCursorHandle {
        self.raw
    }
}

impl Drop for QueueCursor {
    fn drop(&mut self) {
        self.connection.provider().close_cursor(self.raw);
    }
}

/// Read-side operations on one queue.
///
/// All blocking primitives accept a cancellation token and an optional
/// timeout; `None` waits indefinitely. An elapsed timeout is an absent
/// result (`Ok(None)`), never an error.
///
/// # Example
///
/// ```rust
/// use relay_runtime::providers::InMemoryProvider;
/// use relay_runtime::{
///     Message, QueueConnection, QueueName, QueueReader, QueueWriter, TransactionMode,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let provider = Arc::new(InMemoryProvider::new());
/// let name = QueueName::parse(".\\private$\\orders").unwrap();
///
/// let writer = QueueWriter::new(Arc::new(QueueConnection::new(
///     name.clone(),
///     provider.clone(),
/// )));
/// writer
///     .send(&Message::new("hello".into()), TransactionMode::None)
///     .await
///     .unwrap();
///
/// let reader = QueueReader::new(Arc::new(QueueConnection::new(name, provider)));
/// let message = reader
///     .receive(Some(Duration::from_secs(1)), &CancellationToken::new())
///     .await
///     .unwrap()
///     .expect("message should be waiting");
/// assert_eq!(message.body().as_ref(), b"hello");
/// # });
/// ```
pub struct QueueReader {
    connection: Arc<QueueConnection>,
}

impl QueueReader {
    pub fn new(connection: Arc<QueueConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<QueueConnection> {
        &self.connection
    }

    /// Inspect the front message without consuming it.
    pub async fn peek(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, QueueError> {
        self.peek_with(PropertyFilter::default(), timeout, cancel)
            .await
    }

    /// Peek with an explicit property filter.
    pub async fn peek_with(
        &self,
        filter: PropertyFilter,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, QueueError> {
        let request = ReceiveRequest::peek()
            .with_filter(filter)
            .with_timeout(timeout.unwrap_or(INFINITE_TIMEOUT));
        ReceiveOperation::new(&self.connection, request)
            .run(cancel)
            .await
    }

    /// Consume the front message.
    pub async fn receive(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, QueueError> {
        self.receive_with(PropertyFilter::default(), timeout, cancel)
            .await
    }

    /// Receive with an explicit property filter.
    pub async fn receive_with(
        &self,
        filter: PropertyFilter,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, QueueError> {
        let request = ReceiveRequest::receive()
            .with_filter(filter)
            .with_timeout(timeout.unwrap_or(INFINITE_TIMEOUT));
        ReceiveOperation::new(&self.connection, request)
            .run(cancel)
            .await
    }

    /// Find and consume the first message whose correlation id matches.
    ///
    /// Opens a private cursor and peeks forward in FIFO arrival order
    /// (peek-current, then peek-next), comparing correlation ids; on a
    /// match the message is received through the cursor with `filter` and
    /// returned, leaving every other message in place. Returns `Ok(None)`
    /// when the deadline passes without a match.
    ///
    /// This is a linear scan bounded by queue depth, sized for the small
    /// FIFO-ordered reply queues the dispatch protocol uses.
    pub async fn read_by_correlation(
        &self,
        correlation_id: &MessageId,
        filter: PropertyFilter,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, QueueError> {
        // A timeout too large to resolve to a deadline (INFINITE_TIMEOUT
        // included) means "wait indefinitely".
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let cursor = QueueCursor::open(Arc::clone(&self.connection))?;
        let mut action = ReceiveAction::PeekCurrent;

        loop {
            let Some(remaining) = Self::remaining(deadline) else {
                return Ok(None);
            };
            let request = ReceiveRequest::peek()
                .with_action(action)
                .with_cursor(cursor.raw())
                .with_filter(PropertyFilter::correlation_scan())
                .with_timeout(remaining);
            let Some(candidate) = ReceiveOperation::new(&self.connection, request)
                .run(cancel)
                .await?
            else {
                // Cursor ran out before a match.
                return Ok(None);
            };

            if candidate.correlation_id() == *correlation_id {
                trace!(
                    queue = %self.connection.name(),
                    correlation = %correlation_id,
                    "correlation scan matched"
                );
                let Some(remaining) = Self::remaining(deadline) else {
                    return Ok(None);
                };
                let request = ReceiveRequest::receive()
                    .with_cursor(cursor.raw())
                    .with_filter(filter)
                    .with_timeout(remaining);
                return ReceiveOperation::new(&self.connection, request)
                    .run(cancel)
                    .await;
            }

            action = ReceiveAction::PeekNext;
        }
    }

    fn remaining(deadline: Option<Instant>) -> Option<Duration> {
        match deadline {
            None => Some(INFINITE_TIMEOUT),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    None
                } else {
                    Some(deadline - now)
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
