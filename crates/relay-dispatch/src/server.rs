//! The serving side of the dispatch protocol.
//!
//! [`DispatchServer::process`] runs three loops concurrently until the
//! cancellation token fires:
//!
//! 1. a receive loop that reads the inbound queue, decodes envelopes, and
//!    fans them out over two unbounded channels (one per request kind);
//! 2. a command worker that drains its channel and invokes handlers,
//!    isolating per-message failures;
//! 3. a query worker that invokes handlers and writes each result to the
//!    originating message's response queue, correlated by request id.
//!
//! Only a fatal failure of the receive loop itself tears the server down;
//! it closes both channels so the workers drain and exit, and `process`
//! returns the failure after all three loops have stopped.

use crate::envelope::{Envelope, RequestKind, BODY_TYPE_JSON};
use crate::error::DispatchError;
use crate::handler::HandlerRegistry;
use relay_runtime::{
    Message, NativeQueueProvider, QueueConnection, QueueError, QueueName, QueueReader, QueueWriter,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on cached reply writers. When a new response queue would
/// exceed it, an existing entry is dropped, closing its handles.
const MAX_REPLY_WRITERS: usize = 32;

/// One decoded inbound request on its way to a worker.
struct Inbound {
    envelope: Envelope,
    message: Message,
}

/// Serves one inbound request queue with a fixed handler registry.
pub struct DispatchServer {
    provider: Arc<dyn NativeQueueProvider>,
    inbound: Arc<QueueConnection>,
    registry: HandlerRegistry,
}

impl DispatchServer {
    pub fn new(
        provider: Arc<dyn NativeQueueProvider>,
        request_queue: QueueName,
        registry: HandlerRegistry,
    ) -> Self {
        let inbound = Arc::new(QueueConnection::new(
            request_queue,
            Arc::clone(&provider),
        ));
        Self {
            provider,
            inbound,
            registry,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run the receive loop and both workers until cancellation.
    ///
    /// Returns `Ok(())` on a clean cancellation; a fatal receive failure is
    /// returned after the workers have drained.
    pub async fn process(&self, cancel: &CancellationToken) -> Result<(), DispatchError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel::<Inbound>();
        let (query_tx, query_rx) = mpsc::unbounded_channel::<Inbound>();

        info!(queue = %self.inbound.name(), "dispatch server starting");
        let (received, (), ()) = tokio::join!(
            self.receive_loop(cancel, command_tx, query_tx),
            self.command_loop(command_rx),
            self.query_loop(query_rx),
        );
        info!(queue = %self.inbound.name(), "dispatch server stopped");
        received.map_err(DispatchError::from)
    }

    async fn receive_loop(
        &self,
        cancel: &CancellationToken,
        command_tx: mpsc::UnboundedSender<Inbound>,
        query_tx: mpsc::UnboundedSender<Inbound>,
    ) -> Result<(), QueueError> {
        let reader = QueueReader::new(Arc::clone(&self.inbound));
        loop {
            let message = match reader.receive(None, cancel).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(error) if error.is_cancelled() => {
                    debug!(queue = %self.inbound.name(), "receive loop cancelled");
                    return Ok(());
                }
                // Dropping the senders here closes both channels, so the
                // workers drain and exit with the server.
                Err(error) => return Err(error),
            };

            let envelope = match Envelope::decode(message.body()) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(queue = %self.inbound.name(), %error, "rejecting undecodable message");
                    continue;
                }
            };

            let (known, channel) = match envelope.kind {
                RequestKind::Command => (
                    self.registry.has_command(&envelope.type_tag),
                    &command_tx,
                ),
                RequestKind::Query => (self.registry.has_query(&envelope.type_tag), &query_tx),
            };
            if !known {
                warn!(
                    queue = %self.inbound.name(),
                    kind = ?envelope.kind,
                    type_tag = %envelope.type_tag,
                    "rejecting request with no registered handler"
                );
                continue;
            }
            // The worker only disappears when the server is tearing down.
            if channel.send(Inbound { envelope, message }).is_err() {
                return Ok(());
            }
        }
    }

    async fn command_loop(&self, mut requests: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(Inbound { envelope, message }) = requests.recv().await {
            debug!(type_tag = %envelope.type_tag, id = %message.id(), "running command");
            if let Err(error) = self
                .registry
                .run_command(&envelope.type_tag, envelope.payload)
                .await
            {
                warn!(
                    type_tag = %envelope.type_tag,
                    id = %message.id(),
                    %error,
                    "command handler failed"
                );
            }
        }
    }

    async fn query_loop(&self, mut requests: mpsc::UnboundedReceiver<Inbound>) {
        let mut writers: HashMap<QueueName, QueueWriter> = HashMap::new();
        while let Some(Inbound { envelope, message }) = requests.recv().await {
            debug!(type_tag = %envelope.type_tag, id = %message.id(), "running query");
            let result = self
                .registry
                .run_query(&envelope.type_tag, envelope.payload.clone())
                .await;
            let value = match result {
                Ok(value) => value,
                // The caller observes a timeout; the loop carries on.
                Err(error) => {
                    warn!(
                        type_tag = %envelope.type_tag,
                        id = %message.id(),
                        %error,
                        "query handler failed"
                    );
                    continue;
                }
            };

            let Some(response_queue) = message.response_queue() else {
                warn!(
                    type_tag = %envelope.type_tag,
                    id = %message.id(),
                    "query carries no response queue, dropping reply"
                );
                continue;
            };

            if let Err(error) = self
                .reply(&mut writers, response_queue, &message, value)
                .await
            {
                warn!(
                    type_tag = %envelope.type_tag,
                    id = %message.id(),
                    %error,
                    "failed to deliver query reply"
                );
                // The cached writer may hold a broken connection; the next
                // reply to this queue reopens fresh.
                writers.remove(response_queue);
            }
        }
    }

    async fn reply(
        &self,
        writers: &mut HashMap<QueueName, QueueWriter>,
        response_queue: &QueueName,
        request: &Message,
        value: serde_json::Value,
    ) -> Result<(), DispatchError> {
        if writers.len() >= MAX_REPLY_WRITERS && !writers.contains_key(response_queue) {
            let evicted = writers.keys().next().cloned();
            if let Some(queue) = evicted {
                debug!(queue = %queue, "evicting cached reply writer");
                writers.remove(&queue);
            }
        }
        let writer = writers.entry(response_queue.clone()).or_insert_with(|| {
            QueueWriter::new(Arc::new(QueueConnection::new(
                response_queue.clone(),
                Arc::clone(&self.provider),
            )))
        });
        let body = serde_json::to_vec(&value)?;
        let reply = Message::new(body.into())
            .with_correlation_id(request.id())
            .with_body_type(BODY_TYPE_JSON);
        let mode = writer.auto_mode()?;
        writer.send(&reply, mode).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
