//! The request side of the dispatch protocol.

use crate::envelope::{Envelope, BODY_TYPE_JSON};
use crate::error::DispatchError;
use relay_runtime::{
    AckLevel, Message, MessageId, NativeQueueProvider, PropertyFilter, QueueConnection, QueueName,
    QueueReader, QueueWriter,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Sends commands and runs queries against one remote request queue,
/// collecting query replies from a local reply queue.
pub struct DispatchClient {
    writer: QueueWriter,
    reply_reader: QueueReader,
    reply_queue: QueueName,
}

impl DispatchClient {
    /// Create a client for `request_queue`, with query replies expected on
    /// `reply_queue`.
    pub fn new(
        provider: Arc<dyn NativeQueueProvider>,
        request_queue: QueueName,
        reply_queue: QueueName,
    ) -> Self {
        let writer = QueueWriter::new(Arc::new(QueueConnection::new(
            request_queue,
            Arc::clone(&provider),
        )));
        let reply_reader = QueueReader::new(Arc::new(QueueConnection::new(
            reply_queue.clone(),
            provider,
        )));
        Self {
            writer,
            reply_reader,
            reply_queue,
        }
    }

    /// The queue query replies arrive on.
    pub fn reply_queue(&self) -> &QueueName {
        &self.reply_queue
    }

    /// Submit a fire-and-forget command, returning the assigned message id.
    pub async fn send_command<T: Serialize>(
        &self,
        type_tag: &str,
        command: &T,
    ) -> Result<MessageId, DispatchError> {
        let message = self.command_message(type_tag, command)?;
        self.deliver(type_tag, message).await
    }

    /// Submit a command with delivery tracking: a negative acknowledgment
    /// is posted to `admin_queue` if the message cannot reach its queue.
    pub async fn send_command_acknowledged<T: Serialize>(
        &self,
        type_tag: &str,
        command: &T,
        admin_queue: QueueName,
    ) -> Result<MessageId, DispatchError> {
        let message = self
            .command_message(type_tag, command)?
            .with_admin_queue(admin_queue)
            .with_acknowledge(AckLevel::NackReachQueue);
        self.deliver(type_tag, message).await
    }

    /// Run a query and await its typed reply.
    ///
    /// The request is stamped with this client's reply queue; the reply is
    /// found by scanning that queue for a correlation id equal to the
    /// request's message id. A deadline that passes without a reply is
    /// [`DispatchError::Timeout`].
    pub async fn run_query<Q, R>(
        &self,
        type_tag: &str,
        query: &Q,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<R, DispatchError>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let envelope = Envelope::query(type_tag, query)?;
        let message = Message::new(envelope.encode()?)
            .with_label(type_tag)
            .with_body_type(BODY_TYPE_JSON)
            .with_response_queue(self.reply_queue.clone());
        let id = self.deliver(type_tag, message).await?;
        trace!(%id, type_tag, "query sent, awaiting reply");

        let reply = self
            .reply_reader
            .read_by_correlation(&id, PropertyFilter::default(), Some(timeout), cancel)
            .await?;
        match reply {
            Some(message) => {
                debug!(%id, type_tag, "query reply received");
                Ok(serde_json::from_slice(message.body())?)
            }
            None => Err(DispatchError::Timeout { elapsed: timeout }),
        }
    }

    fn command_message<T: Serialize>(
        &self,
        type_tag: &str,
        command: &T,
    ) -> Result<Message, DispatchError> {
        let envelope = Envelope::command(type_tag, command)?;
        Ok(Message::new(envelope.encode()?)
            .with_label(type_tag)
            .with_body_type(BODY_TYPE_JSON))
    }

    async fn deliver(&self, type_tag: &str, message: Message) -> Result<MessageId, DispatchError> {
        let mode = self.writer.auto_mode()?;
        let id = self.writer.send(&message, mode).await?;
        trace!(%id, type_tag, "request delivered");
        Ok(id)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
