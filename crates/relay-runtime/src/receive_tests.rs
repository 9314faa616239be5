//! Tests for the asynchronous receive state machine.

use super::*;
use crate::message::MessageId;
use crate::name::QueueName;
use crate::provider::NativeQueueProvider;
use crate::providers::InMemoryProvider;
use crate::writer::{QueueWriter, TransactionMode};
use bytes::Bytes;
use std::sync::Arc;

const ORDERS: &str = ".\\private$\\orders";

fn provider() -> Arc<InMemoryProvider> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Arc::new(InMemoryProvider::new())
}

fn connection(provider: &Arc<InMemoryProvider>, path: &str) -> Arc<QueueConnection> {
    Arc::new(QueueConnection::new(
        QueueName::parse(path).unwrap(),
        Arc::clone(provider) as Arc<dyn NativeQueueProvider>,
    ))
}

async fn push(provider: &Arc<InMemoryProvider>, path: &str, body: &[u8]) -> MessageId {
    let writer = QueueWriter::new(connection(provider, path));
    writer
        .send(
            &Message::new(Bytes::copy_from_slice(body)),
            TransactionMode::None,
        )
        .await
        .unwrap()
}

/// Verify the synchronous-completion fast path when a message waits.
#[tokio::test]
async fn test_completes_synchronously_when_message_waiting() {
    let provider = provider();
    let id = push(&provider, ORDERS, b"first").await;
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    let message = ReceiveOperation::new(&connection, ReceiveRequest::receive())
        .run(&cancel)
        .await
        .unwrap()
        .expect("message should be present");
    assert_eq!(message.body().as_ref(), b"first");
    assert_eq!(message.id(), id);
    assert_eq!(provider.queue_len(connection.name()), 0);
}

/// Verify that a zero timeout on an empty queue resolves to absence.
#[tokio::test]
async fn test_zero_timeout_empty_queue_is_absent() {
    let provider = provider();
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    let request = ReceiveRequest::receive().with_timeout(Duration::ZERO);
    let result = ReceiveOperation::new(&connection, request)
        .run(&cancel)
        .await
        .unwrap();
    assert!(result.is_none());
}

/// Verify that an elapsed timeout is an absent result, never an error.
#[tokio::test]
async fn test_elapsed_timeout_is_absent() {
    let provider = provider();
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    let request = ReceiveRequest::receive().with_timeout(Duration::from_millis(50));
    let result = ReceiveOperation::new(&connection, request)
        .run(&cancel)
        .await
        .unwrap();
    assert!(result.is_none());
}

/// Verify that a pending receive completes when a message arrives.
#[tokio::test]
async fn test_pending_completes_on_arrival() {
    let provider = provider();
    let connection = connection(&provider, ORDERS);

    let sender = Arc::clone(&provider);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        push(&sender, ORDERS, b"late arrival").await;
    });

    let cancel = CancellationToken::new();
    let message = ReceiveOperation::new(&connection, ReceiveRequest::receive())
        .run(&cancel)
        .await
        .unwrap()
        .expect("arrival should complete the receive");
    assert_eq!(message.body().as_ref(), b"late arrival");
}

/// Verify that a buffer overflow grows the package and retries until the
/// full body fits.
#[tokio::test]
async fn test_overflow_grows_and_retries() {
    let provider = provider();
    let body = vec![0x5A; 1024];
    push(&provider, ORDERS, &body).await;
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    let request = ReceiveRequest::receive()
        .with_filter(PropertyFilter::default().with_body_capacity(8));
    let message = ReceiveOperation::new(&connection, request)
        .run(&cancel)
        .await
        .unwrap()
        .expect("message should be present");
    assert_eq!(message.body().as_ref(), &body[..]);
}

/// Verify that a peek leaves the message in place.
#[tokio::test]
async fn test_peek_leaves_message_in_place() {
    let provider = provider();
    push(&provider, ORDERS, b"stay put").await;
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    let peeked = ReceiveOperation::new(&connection, ReceiveRequest::peek())
        .run(&cancel)
        .await
        .unwrap()
        .expect("peek should see the message");
    assert_eq!(peeked.body().as_ref(), b"stay put");
    assert_eq!(provider.queue_len(connection.name()), 1);
}

/// Verify that an overflowed peek-next is retried as peek-current so the
/// advanced cursor position is not skipped.
#[tokio::test]
async fn test_peek_next_overflow_does_not_skip() {
    let provider = provider();
    push(&provider, ORDERS, b"small").await;
    let big = vec![0x42; 600];
    push(&provider, ORDERS, &big).await;
    let connection = connection(&provider, ORDERS);

    let handle = connection.read_handle().unwrap();
    let cursor = connection
        .provider()
        .create_cursor(handle.raw().unwrap())
        .unwrap();
    let cancel = CancellationToken::new();

    let first = ReceiveOperation::new(
        &connection,
        ReceiveRequest::peek().with_cursor(cursor),
    )
    .run(&cancel)
    .await
    .unwrap()
    .expect("cursor should start at the front");
    assert_eq!(first.body().as_ref(), b"small");

    // The second body overflows the small buffer after the cursor has
    // already advanced.
    let request = ReceiveRequest::peek()
        .with_action(ReceiveAction::PeekNext)
        .with_cursor(cursor)
        .with_filter(PropertyFilter::default().with_body_capacity(8));
    let second = ReceiveOperation::new(&connection, request)
        .run(&cancel)
        .await
        .unwrap()
        .expect("overflowed peek-next should still yield the message");
    assert_eq!(second.body().as_ref(), &big[..]);

    // The cursor is at the tail now.
    let request = ReceiveRequest::peek()
        .with_action(ReceiveAction::PeekNext)
        .with_cursor(cursor)
        .with_timeout(Duration::ZERO);
    let end = ReceiveOperation::new(&connection, request)
        .run(&cancel)
        .await
        .unwrap();
    assert!(end.is_none());
}

/// Verify that an already-cancelled token resolves immediately.
#[tokio::test]
async fn test_cancelled_token_resolves_immediately() {
    let provider = provider();
    push(&provider, ORDERS, b"never seen").await;
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = ReceiveOperation::new(&connection, ReceiveRequest::receive())
        .run(&cancel)
        .await;
    assert!(matches!(result, Err(QueueError::Cancelled)));
    assert_eq!(provider.queue_len(connection.name()), 1);
}

/// Verify that cancellation unblocks a pending receive exactly once, as an
/// error.
#[tokio::test]
async fn test_cancel_unblocks_pending_receive() {
    let provider = provider();
    let connection = connection(&provider, ORDERS);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = ReceiveOperation::new(&connection, ReceiveRequest::receive())
        .run(&cancel)
        .await;
    assert!(matches!(result, Err(QueueError::Cancelled)));
}

/// Verify transparent stale-handle recovery: the receive reopens and
/// completes without surfacing an error.
#[tokio::test]
async fn test_stale_handle_recovered_transparently() {
    let provider = provider();
    let connection = connection(&provider, ORDERS);

    // Force the read handle open, then invalidate every handle.
    let cancel = CancellationToken::new();
    let request = ReceiveRequest::receive().with_timeout(Duration::ZERO);
    assert!(ReceiveOperation::new(&connection, request)
        .run(&cancel)
        .await
        .unwrap()
        .is_none());
    provider.invalidate_handles();

    push(&provider, ORDERS, b"after restart").await;
    let message = ReceiveOperation::new(&connection, ReceiveRequest::receive())
        .run(&cancel)
        .await
        .unwrap()
        .expect("receive should recover from the stale handle");
    assert_eq!(message.body().as_ref(), b"after restart");
}
