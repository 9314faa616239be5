//! Queue writing and transactions.

use crate::connection::QueueConnection;
use crate::error::QueueError;
use crate::marshal::PropertyId;
use crate::message::{Message, MessageId};
use crate::provider::{NativeQueueProvider, NativeStatus, TransactionId, TransactionToken};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Retry budget for transparent stale-handle recovery on sends.
const MAX_STALE_RETRIES: u32 = 5;

/// How a send participates in a transaction.
#[derive(Debug, Clone, Copy)]
pub enum TransactionMode<'a> {
    /// No transaction.
    None,
    /// The auto-commit single-message variant; no begin/commit required.
    /// Required when the target queue is itself transactional.
    Single,
    /// An ambient transaction shared with other operations.
    Within(&'a QueueTransaction),
}

impl TransactionMode<'_> {
    fn token(&self) -> Option<TransactionToken> {
        match self {
            Self::None => None,
            Self::Single => Some(TransactionToken::Single),
            Self::Within(txn) => Some(TransactionToken::Within(txn.id())),
        }
    }
}

/// An explicit provider transaction.
///
/// Single-writer: a transaction must not be shared between concurrent
/// send/receive calls. Aborted on drop if neither committed nor aborted.
pub struct QueueTransaction {
    provider: Arc<dyn NativeQueueProvider>,
    id: TransactionId,
    finished: AtomicBool,
}

impl QueueTransaction {
    /// Begin a new transaction with the provider.
    pub fn begin(provider: Arc<dyn NativeQueueProvider>) -> Result<Self, QueueError> {
        let id = provider
            .begin_transaction()
            .map_err(|status| QueueError::provider(status, "begin transaction"))?;
        Ok(Self {
            provider,
            id,
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Commit, making every buffered send visible atomically.
    pub fn commit(self) -> Result<(), QueueError> {
        self.finished.store(true, Ordering::Release);
        let status = self.provider.commit_transaction(self.id);
        if status.succeeded() {
            Ok(())
        } else {
            Err(QueueError::Transaction {
                message: format!("commit failed with {}", status),
            })
        }
    }

    /// Abort, discarding every buffered send.
    pub fn abort(self) -> Result<(), QueueError> {
        self.finished.store(true, Ordering::Release);
        let status = self.provider.abort_transaction(self.id);
        if status.succeeded() {
            Ok(())
        } else {
            Err(QueueError::Transaction {
                message: format!("abort failed with {}", status),
            })
        }
    }
}

impl fmt::Debug for QueueTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTransaction")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for QueueTransaction {
    fn drop(&mut self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.provider.abort_transaction(self.id);
        }
    }
}

/// Write-side operations on one queue.
pub struct QueueWriter {
    connection: Arc<QueueConnection>,
}

impl QueueWriter {
    pub fn new(connection: Arc<QueueConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<QueueConnection> {
        &self.connection
    }

    /// Whether the target queue is transactional, informing callers that
    /// sends must be wrapped in (at least) a single-message transaction.
    pub fn is_transactional(&self) -> Result<bool, QueueError> {
        self.connection.is_transactional()
    }

    /// The transaction mode matching the queue's declared nature: `Single`
    /// for transactional queues, `None` otherwise.
    pub fn auto_mode(&self) -> Result<TransactionMode<'static>, QueueError> {
        Ok(if self.is_transactional()? {
            TransactionMode::Single
        } else {
            TransactionMode::None
        })
    }

    /// Send a message, returning the identifier the provider assigned.
    ///
    /// Stale write handles are recovered transparently; any fatal status
    /// surfaces as a provider error. The call suspends rather than blocking
    /// the calling thread.
    pub async fn send(
        &self,
        message: &Message,
        mode: TransactionMode<'_>,
    ) -> Result<MessageId, QueueError> {
        let token = mode.token();
        let mut package = message.to_send_marshal().pack();
        let mut stale_retries = 0u32;

        loop {
            let handle = self.connection.write_handle()?;
            let raw = handle.raw()?;
            let (status, returned) = self.connection.provider().send(raw, package, token).await;
            package = returned;

            match status {
                NativeStatus::StaleHandle => {
                    stale_retries += 1;
                    if stale_retries > MAX_STALE_RETRIES {
                        return Err(QueueError::provider(status, "send"));
                    }
                    self.connection.invalidate_write();
                }
                NativeStatus::OperationCancelled => return Err(QueueError::Cancelled),
                NativeStatus::Ok | NativeStatus::Info(_) => {
                    let id =
                        MessageId::from_bytes(package.unpack().get_id(PropertyId::Identifier));
                    trace!(queue = %self.connection.name(), %id, "message sent");
                    return Ok(id);
                }
                // Overflow and timeout have no meaning for sends; anything
                // that is not success is a provider fault here.
                _ => {
                    debug!(queue = %self.connection.name(), %status, "send failed");
                    return Err(QueueError::provider(status, "send"));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
