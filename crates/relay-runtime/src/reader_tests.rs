//! Tests for queue reading and the correlation scan.

use super::*;
use crate::name::QueueName;
use crate::provider::NativeQueueProvider;
use crate::providers::InMemoryProvider;
use crate::writer::{QueueWriter, TransactionMode};
use bytes::Bytes;

const REPLIES: &str = ".\\private$\\replies";

fn provider() -> Arc<InMemoryProvider> {
    Arc::new(InMemoryProvider::new())
}

fn connection(provider: &Arc<InMemoryProvider>, path: &str) -> Arc<QueueConnection> {
    Arc::new(QueueConnection::new(
        QueueName::parse(path).unwrap(),
        Arc::clone(provider) as Arc<dyn NativeQueueProvider>,
    ))
}

async fn push_reply(provider: &Arc<InMemoryProvider>, correlation: MessageId, body: &[u8]) {
    let writer = QueueWriter::new(connection(provider, REPLIES));
    writer
        .send(
            &Message::new(Bytes::copy_from_slice(body)).with_correlation_id(correlation),
            TransactionMode::None,
        )
        .await
        .unwrap();
}

/// Verify the basic receive round trip through the reader.
#[tokio::test]
async fn test_receive_round_trip() {
    let provider = provider();
    push_reply(&provider, MessageId::generate(1), b"payload").await;

    let reader = QueueReader::new(connection(&provider, REPLIES));
    let cancel = CancellationToken::new();
    let message = reader
        .receive(Some(Duration::ZERO), &cancel)
        .await
        .unwrap()
        .expect("message should be present");
    assert_eq!(message.body().as_ref(), b"payload");
    assert_eq!(provider.queue_len(reader.connection().name()), 0);
}

/// Verify that peek does not consume and receive afterwards does.
#[tokio::test]
async fn test_peek_then_receive() {
    let provider = provider();
    push_reply(&provider, MessageId::generate(1), b"once").await;

    let reader = QueueReader::new(connection(&provider, REPLIES));
    let cancel = CancellationToken::new();
    let peeked = reader.peek(Some(Duration::ZERO), &cancel).await.unwrap();
    assert!(peeked.is_some());
    assert_eq!(provider.queue_len(reader.connection().name()), 1);

    let received = reader.receive(Some(Duration::ZERO), &cancel).await.unwrap();
    assert!(received.is_some());
    assert_eq!(provider.queue_len(reader.connection().name()), 0);
}

/// Verify that the correlation scan consumes only the matching message and
/// leaves the rest in arrival order.
#[tokio::test]
async fn test_correlation_scan_consumes_only_match() {
    let provider = provider();
    let first = MessageId::generate(1);
    let wanted = MessageId::generate(2);
    let third = MessageId::generate(3);
    push_reply(&provider, first, b"reply one").await;
    push_reply(&provider, wanted, b"reply two").await;
    push_reply(&provider, third, b"reply three").await;

    let reader = QueueReader::new(connection(&provider, REPLIES));
    let cancel = CancellationToken::new();
    let message = reader
        .read_by_correlation(
            &wanted,
            PropertyFilter::default(),
            Some(Duration::from_secs(5)),
            &cancel,
        )
        .await
        .unwrap()
        .expect("the matching reply should be found");
    assert_eq!(message.correlation_id(), wanted);
    assert_eq!(message.body().as_ref(), b"reply two");
    assert_eq!(provider.queue_len(reader.connection().name()), 2);

    // The untouched messages still come out in arrival order.
    let remaining = reader
        .receive(Some(Duration::ZERO), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.correlation_id(), first);
    let remaining = reader
        .receive(Some(Duration::ZERO), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.correlation_id(), third);
}

/// Verify that a scan with no match resolves to absence at the deadline.
#[tokio::test]
async fn test_correlation_scan_deadline_is_absent() {
    let provider = provider();
    push_reply(&provider, MessageId::generate(1), b"unrelated").await;

    let reader = QueueReader::new(connection(&provider, REPLIES));
    let cancel = CancellationToken::new();
    let result = reader
        .read_by_correlation(
            &MessageId::generate(99),
            PropertyFilter::default(),
            Some(Duration::from_millis(100)),
            &cancel,
        )
        .await
        .unwrap();
    assert!(result.is_none());
    // The unrelated message was not consumed.
    assert_eq!(provider.queue_len(reader.connection().name()), 1);
}

/// Verify that the unbounded timeout value scans without a deadline
/// instead of overflowing one.
#[tokio::test]
async fn test_correlation_scan_accepts_unbounded_timeout() {
    let provider = provider();
    let wanted = MessageId::generate(4);
    push_reply(&provider, wanted, b"waiting reply").await;

    let reader = QueueReader::new(connection(&provider, REPLIES));
    let cancel = CancellationToken::new();
    let message = reader
        .read_by_correlation(
            &wanted,
            PropertyFilter::default(),
            Some(INFINITE_TIMEOUT),
            &cancel,
        )
        .await
        .unwrap()
        .expect("the waiting reply should be found");
    assert_eq!(message.body().as_ref(), b"waiting reply");
}

/// Verify that the scan picks up a match that arrives while waiting.
#[tokio::test]
async fn test_correlation_scan_waits_for_arrival() {
    let provider = provider();
    let wanted = MessageId::generate(7);

    let sender = Arc::clone(&provider);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        push_reply(&sender, wanted, b"late reply").await;
    });

    let reader = QueueReader::new(connection(&provider, REPLIES));
    let cancel = CancellationToken::new();
    let message = reader
        .read_by_correlation(
            &wanted,
            PropertyFilter::default(),
            Some(Duration::from_secs(5)),
            &cancel,
        )
        .await
        .unwrap()
        .expect("the late reply should be found");
    assert_eq!(message.body().as_ref(), b"late reply");
}
