//! End-to-end tests for the dispatch server loops.

use super::*;
use crate::client::DispatchClient;
use crate::handler::HandlerError;
use relay_runtime::InMemoryProvider;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

const REQUESTS: &str = ".\\private$\\requests";
const REPLIES: &str = ".\\private$\\replies";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Increment {
    by: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Total {
    total: u32,
}

struct Fixture {
    provider: Arc<InMemoryProvider>,
    client: DispatchClient,
    cancel: CancellationToken,
    server: JoinHandle<Result<(), DispatchError>>,
    counter: Arc<AtomicU32>,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(registry_for: impl FnOnce(Arc<AtomicU32>) -> HandlerRegistry) -> Fixture {
    init_logging();
    let provider = Arc::new(InMemoryProvider::new());
    let counter = Arc::new(AtomicU32::new(0));
    let registry = registry_for(Arc::clone(&counter));

    let server = Arc::new(DispatchServer::new(
        Arc::clone(&provider) as Arc<dyn NativeQueueProvider>,
        QueueName::parse(REQUESTS).unwrap(),
        registry,
    ));
    let cancel = CancellationToken::new();
    let task = {
        let server = Arc::clone(&server);
        let token = cancel.clone();
        tokio::spawn(async move { server.process(&token).await })
    };

    let client = DispatchClient::new(
        Arc::clone(&provider) as Arc<dyn NativeQueueProvider>,
        QueueName::parse(REQUESTS).unwrap(),
        QueueName::parse(REPLIES).unwrap(),
    );
    Fixture {
        provider,
        client,
        cancel,
        server: task,
        counter,
    }
}

fn counting_registry(counter: Arc<AtomicU32>) -> HandlerRegistry {
    HandlerRegistry::new()
        .command("counter.increment", move |input: Increment| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(input.by, Ordering::SeqCst);
                Ok(())
            }
        })
        .query("counter.double", |input: Increment| async move {
            Ok(Total { total: input.by * 2 })
        })
}

async fn wait_for(counter: &AtomicU32, expected: u32) {
    for _ in 0..500 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "counter never reached {} (at {})",
        expected,
        counter.load(Ordering::SeqCst)
    );
}

async fn stop(fixture: Fixture) {
    fixture.cancel.cancel();
    fixture.server.await.unwrap().unwrap();
}

/// Verify that a submitted command reaches its handler.
#[tokio::test]
async fn test_command_reaches_handler() {
    let fixture = start(counting_registry);
    fixture
        .client
        .send_command("counter.increment", &Increment { by: 7 })
        .await
        .unwrap();
    wait_for(&fixture.counter, 7).await;
    stop(fixture).await;
}

/// Verify the full query round trip through the server.
#[tokio::test]
async fn test_query_round_trip() {
    let fixture = start(counting_registry);
    let cancel = CancellationToken::new();
    let total: Total = fixture
        .client
        .run_query(
            "counter.double",
            &Increment { by: 21 },
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(total, Total { total: 42 });
    stop(fixture).await;
}

/// Verify command/query isolation: a failing query handler makes its
/// caller observe a timeout, and a subsequent command still executes.
#[tokio::test]
async fn test_failing_query_does_not_stop_server() {
    let fixture = start(|counter| {
        counting_registry(counter).query("always.fails", |_input: Increment| async {
            Err::<Total, _>(HandlerError::new("backend unavailable"))
        })
    });

    let cancel = CancellationToken::new();
    let result = fixture
        .client
        .run_query::<_, Total>(
            "always.fails",
            &Increment { by: 1 },
            Duration::from_millis(500),
            &cancel,
        )
        .await;
    assert!(result.unwrap_err().is_timeout());

    fixture
        .client
        .send_command("counter.increment", &Increment { by: 3 })
        .await
        .unwrap();
    wait_for(&fixture.counter, 3).await;
    stop(fixture).await;
}

/// Verify that requests with no registered handler are dropped without
/// disturbing later traffic.
#[tokio::test]
async fn test_unknown_type_rejected_and_server_continues() {
    let fixture = start(counting_registry);
    fixture
        .client
        .send_command("nobody.home", &Increment { by: 99 })
        .await
        .unwrap();
    fixture
        .client
        .send_command("counter.increment", &Increment { by: 2 })
        .await
        .unwrap();
    wait_for(&fixture.counter, 2).await;
    stop(fixture).await;
}

/// Verify that an undecodable body is rejected without crashing the
/// receive loop.
#[tokio::test]
async fn test_garbage_body_rejected_and_server_continues() {
    let fixture = start(counting_registry);

    let writer = QueueWriter::new(Arc::new(QueueConnection::new(
        QueueName::parse(REQUESTS).unwrap(),
        Arc::clone(&fixture.provider) as Arc<dyn NativeQueueProvider>,
    )));
    writer
        .send(
            &Message::new(bytes::Bytes::from_static(b"not an envelope")),
            relay_runtime::TransactionMode::None,
        )
        .await
        .unwrap();

    fixture
        .client
        .send_command("counter.increment", &Increment { by: 4 })
        .await
        .unwrap();
    wait_for(&fixture.counter, 4).await;
    stop(fixture).await;
}

/// Verify that the reply-writer cache stays bounded when many distinct
/// reply queues come and go.
#[tokio::test]
async fn test_reply_writer_cache_stays_bounded() {
    let fixture = start(counting_registry);

    for i in 0..(MAX_REPLY_WRITERS + 8) {
        let client = DispatchClient::new(
            Arc::clone(&fixture.provider) as Arc<dyn NativeQueueProvider>,
            QueueName::parse(REQUESTS).unwrap(),
            QueueName::parse(&format!(".\\private$\\replies-{}", i)).unwrap(),
        );
        let cancel = CancellationToken::new();
        let total: Total = client
            .run_query(
                "counter.double",
                &Increment { by: 1 },
                Duration::from_secs(5),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(total, Total { total: 2 });
    }

    // Every client has been dropped; what remains open is the server's
    // inbound read handle plus at most the cached reply writers.
    assert!(
        fixture.provider.open_handle_count() <= MAX_REPLY_WRITERS + 1,
        "handle count grew past the cache bound: {}",
        fixture.provider.open_handle_count()
    );
    stop(fixture).await;
}

/// Verify that cancellation stops all three loops cleanly.
#[tokio::test]
async fn test_cancellation_stops_process() {
    let fixture = start(counting_registry);
    fixture.cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), fixture.server)
        .await
        .expect("process should stop after cancellation")
        .unwrap();
    assert!(result.is_ok());
}
