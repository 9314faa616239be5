//! Tests for queue handle lifecycle.

use super::*;
use crate::name::QueueName;
use crate::provider::AccessMode;
use crate::providers::InMemoryProvider;

fn open(provider: &Arc<InMemoryProvider>) -> QueueHandle {
    let name = QueueName::parse(".\\private$\\handles").unwrap();
    let opened = provider.open_queue(&name, AccessMode::Receive).unwrap();
    QueueHandle::new(
        opened.handle,
        opened.kind,
        Arc::clone(provider) as Arc<dyn NativeQueueProvider>,
    )
}

/// Verify that close releases the native handle exactly once.
#[test]
fn test_close_is_idempotent() {
    let provider = Arc::new(InMemoryProvider::new());
    let handle = open(&provider);
    assert_eq!(provider.open_handle_count(), 1);
    assert!(!handle.is_closed());

    handle.close();
    assert!(handle.is_closed());
    assert_eq!(provider.open_handle_count(), 0);

    // A second close is a no-op.
    handle.close();
    assert_eq!(provider.open_handle_count(), 0);
}

/// Verify that raw refuses to hand out a closed handle's token.
#[test]
fn test_raw_after_close_fails() {
    let provider = Arc::new(InMemoryProvider::new());
    let handle = open(&provider);
    assert!(handle.raw().is_ok());

    handle.close();
    assert!(matches!(handle.raw(), Err(QueueError::HandleClosed)));
}

/// Verify that closing through one clone is visible to all clones.
#[test]
fn test_close_shared_across_clones() {
    let provider = Arc::new(InMemoryProvider::new());
    let handle = open(&provider);
    let clone = handle.clone();

    clone.close();
    assert!(handle.is_closed());
    assert!(handle.raw().is_err());
    assert_eq!(provider.open_handle_count(), 0);
}

/// Verify that dropping the last clone releases the native handle.
#[test]
fn test_drop_releases_handle() {
    let provider = Arc::new(InMemoryProvider::new());
    let handle = open(&provider);
    let clone = handle.clone();

    drop(handle);
    assert_eq!(provider.open_handle_count(), 1);
    drop(clone);
    assert_eq!(provider.open_handle_count(), 0);
}
