//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory provider that:
//! - Keeps FIFO queues with cursor support
//! - Reports genuine buffer overflows with per-slot size hints
//! - Implements the synchronous-completion fast path and the pending path
//! - Fails pending receives fast when their handle is closed
//! - Supports stale-handle injection for recovery testing
//! - Buffers transactional sends until commit
//!
//! This provider is intended for:
//! - Unit testing of relay-runtime consumers
//! - Development and prototyping
//! - Reference semantics for native providers

use crate::marshal::{PropertyId, PropertyMarshal, PropertyPackage, PropertyValue, SlotStatus};
use crate::message::{class, AckLevel, MessageId};
use crate::name::QueueName;
use crate::provider::{
    codes, AccessMode, HandleKind, NativeQueueProvider, NativeStatus, OpenedQueue, RawCursorHandle,
    RawQueueHandle, ReceiveAction, ReceiveOutcome, TransactionId, TransactionToken,
    INFINITE_TIMEOUT,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// State for a single queue.
struct QueueState {
    name: QueueName,
    transactional: bool,
    messages: Mutex<Vec<StoredMessage>>,
    arrivals: Notify,
}

impl QueueState {
    fn new(name: QueueName, transactional: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            transactional,
            messages: Mutex::new(Vec::new()),
            arrivals: Notify::new(),
        })
    }
}

/// A message at rest: the full property set captured at send time plus the
/// provider-assigned arrival metadata.
#[derive(Clone)]
struct StoredMessage {
    props: PropertyMarshal,
}

/// State for one open handle.
struct HandleState {
    queue: Arc<QueueState>,
    access: AccessMode,
    stale: AtomicBool,
    closed: AtomicBool,
    /// Notified on close and on stale injection so pending receives
    /// re-evaluate immediately.
    events: Notify,
}

struct CursorState {
    queue: Arc<QueueState>,
    position: usize,
}

struct ProviderState {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    handles: Mutex<HashMap<u64, Arc<HandleState>>>,
    cursors: Mutex<HashMap<u64, CursorState>>,
    transactions: Mutex<HashMap<u64, Vec<BufferedSend>>>,
    next_token: AtomicU64,
    next_sequence: AtomicU32,
    next_lookup: AtomicU64,
}

struct BufferedSend {
    queue: Arc<QueueState>,
    stored: StoredMessage,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory native queue provider.
pub struct InMemoryProvider {
    state: Arc<ProviderState>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ProviderState {
                queues: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
                transactions: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                next_sequence: AtomicU32::new(1),
                next_lookup: AtomicU64::new(1),
            }),
        }
    }

    /// Pre-create a queue, optionally marking it transactional. Queues
    /// opened without pre-creation come into existence non-transactional.
    pub fn create_queue(&self, name: &QueueName, transactional: bool) {
        let mut queues = self.state.queues.lock().expect("provider lock poisoned");
        queues
            .entry(name.canonical())
            .or_insert_with(|| QueueState::new(name.clone(), transactional));
    }

    /// Mark every open handle stale, simulating a provider restart.
    pub fn invalidate_handles(&self) {
        let handles = self.state.handles.lock().expect("provider lock poisoned");
        for handle in handles.values() {
            handle.stale.store(true, Ordering::Release);
            handle.events.notify_waiters();
        }
    }

    /// Number of messages at rest in the named queue.
    pub fn queue_len(&self, name: &QueueName) -> usize {
        let queues = self.state.queues.lock().expect("provider lock poisoned");
        queues
            .get(&name.canonical())
            .map(|q| q.messages.lock().expect("provider lock poisoned").len())
            .unwrap_or(0)
    }

    /// Number of currently open handles.
    pub fn open_handle_count(&self) -> usize {
        self.state
            .handles
            .lock()
            .expect("provider lock poisoned")
            .len()
    }

    fn handle_state(&self, handle: RawQueueHandle) -> Option<Arc<HandleState>> {
        self.state
            .handles
            .lock()
            .expect("provider lock poisoned")
            .get(&handle.0)
            .cloned()
    }

    fn get_or_create_queue(&self, name: &QueueName) -> Arc<QueueState> {
        ProviderState::get_or_create_queue(&self.state, name)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderState {
    fn get_or_create_queue(state: &Arc<Self>, name: &QueueName) -> Arc<QueueState> {
        let mut queues = state.queues.lock().expect("provider lock poisoned");
        queues
            .entry(name.canonical())
            .or_insert_with(|| QueueState::new(name.clone(), false))
            .clone()
    }

    /// Attempt one receive completion. `None` means nothing is available
    /// yet and the caller should keep waiting.
    fn try_complete(
        &self,
        handle: &HandleState,
        cursor: Option<RawCursorHandle>,
        action: ReceiveAction,
        package: &mut PropertyPackage,
    ) -> Option<NativeStatus> {
        if handle.closed.load(Ordering::Acquire) {
            return Some(NativeStatus::OperationCancelled);
        }
        if handle.stale.load(Ordering::Acquire) {
            return Some(NativeStatus::StaleHandle);
        }
        if handle.access == AccessMode::Send {
            return Some(NativeStatus::Fatal(codes::ILLEGAL_OPERATION));
        }

        let mut messages = handle
            .queue
            .messages
            .lock()
            .expect("provider lock poisoned");
        let mut cursors = self.cursors.lock().expect("provider lock poisoned");

        let index = match (action, cursor) {
            (ReceiveAction::PeekNext, None) => {
                return Some(NativeStatus::Fatal(codes::ILLEGAL_OPERATION));
            }
            (_, None) => 0,
            (action, Some(raw)) => {
                let Some(cursor_state) = cursors.get_mut(&raw.0) else {
                    return Some(NativeStatus::Fatal(codes::INVALID_HANDLE));
                };
                if !Arc::ptr_eq(&cursor_state.queue, &handle.queue) {
                    return Some(NativeStatus::Fatal(codes::ILLEGAL_OPERATION));
                }
                match action {
                    ReceiveAction::PeekNext => {
                        // The cursor advances as soon as a next message
                        // exists, even if the copy below overflows; the
                        // engine retries an overflowed peek-next as
                        // peek-current for exactly this reason.
                        if cursor_state.position + 1 >= messages.len() {
                            return None;
                        }
                        cursor_state.position += 1;
                        cursor_state.position
                    }
                    _ => cursor_state.position,
                }
            }
        };

        if index >= messages.len() {
            return None;
        }

        if fill_package(package, &messages[index].props) {
            return Some(NativeStatus::BufferOverflow);
        }

        if action == ReceiveAction::Receive {
            messages.remove(index);
            for cursor_state in cursors.values_mut() {
                if Arc::ptr_eq(&cursor_state.queue, &handle.queue)
                    && cursor_state.position > index
                {
                    cursor_state.position -= 1;
                }
            }
        }

        Some(NativeStatus::Ok)
    }

    fn deliver(state: &Arc<Self>, queue: &Arc<QueueState>, stored: StoredMessage) {
        let ack_level = AckLevel::from_u8(stored.props.get_u32(PropertyId::Acknowledge) as u8);
        let admin = stored.props.get_string(PropertyId::AdminQueue).to_string();

        queue
            .messages
            .lock()
            .expect("provider lock poisoned")
            .push(stored.clone());
        queue.arrivals.notify_waiters();

        // Positive arrival acknowledgment to the sender's admin queue.
        if ack_level.wants_arrival_ack() && !admin.is_empty() {
            if let Ok(admin_name) = QueueName::parse(&admin) {
                let admin_queue = Self::get_or_create_queue(state, &admin_name);
                let ack = Self::build_ack(state, &stored, class::ACK_REACH_QUEUE);
                admin_queue
                    .messages
                    .lock()
                    .expect("provider lock poisoned")
                    .push(ack);
                admin_queue.arrivals.notify_waiters();
            }
        }
    }

    fn build_ack(state: &Arc<Self>, original: &StoredMessage, ack_class: u16) -> StoredMessage {
        let id = MessageId::generate(state.next_sequence.fetch_add(1, Ordering::Relaxed));
        let mut props = PropertyMarshal::new();
        props.set_id(PropertyId::Identifier, id.to_bytes());
        props.set_id(
            PropertyId::CorrelationId,
            original.props.get_id(PropertyId::Identifier),
        );
        props.set_u16(PropertyId::Class, ack_class);
        let label = original.props.get_string(PropertyId::Label);
        if !label.is_empty() {
            props.set_string(PropertyId::Label, label);
        }
        props.set_u32(PropertyId::ArrivedTime, Utc::now().timestamp() as u32);
        props.set_u64(
            PropertyId::LookupId,
            state.next_lookup.fetch_add(1, Ordering::Relaxed),
        );
        StoredMessage { props }
    }
}

/// Copy stored properties into the requested package slots, reporting
/// per-slot overflows. Returns `true` when any slot overflowed; nothing is
/// consumed in that case.
fn fill_package(package: &mut PropertyPackage, props: &PropertyMarshal) -> bool {
    let mut overflow = false;
    for (id, value, status) in package.slots_mut() {
        let Some(stored) = props.value(id) else {
            *status = SlotStatus::Ignored;
            continue;
        };
        match (value, stored) {
            (PropertyValue::Buffer(slot), PropertyValue::Buffer(source)) => {
                match slot.write(source.as_slice()) {
                    Ok(()) => *status = SlotStatus::Ok,
                    Err(required) => {
                        *status = SlotStatus::Overflow { required };
                        overflow = true;
                    }
                }
            }
            (PropertyValue::Text(slot), PropertyValue::Text(source)) => {
                match slot.write(source.as_str()) {
                    Ok(()) => *status = SlotStatus::Ok,
                    Err(required) => {
                        *status = SlotStatus::Overflow { required };
                        overflow = true;
                    }
                }
            }
            (PropertyValue::Id(slot), PropertyValue::Id(source)) => {
                *slot = *source;
                *status = SlotStatus::Ok;
            }
            (PropertyValue::U8(slot), PropertyValue::U8(source)) => {
                *slot = *source;
                *status = SlotStatus::Ok;
            }
            (PropertyValue::U16(slot), PropertyValue::U16(source)) => {
                *slot = *source;
                *status = SlotStatus::Ok;
            }
            (PropertyValue::U32(slot), PropertyValue::U32(source)) => {
                *slot = *source;
                *status = SlotStatus::Ok;
            }
            (PropertyValue::U64(slot), PropertyValue::U64(source)) => {
                *slot = *source;
                *status = SlotStatus::Ok;
            }
            _ => *status = SlotStatus::Ignored,
        }
    }
    overflow
}

#[async_trait]
impl NativeQueueProvider for InMemoryProvider {
    fn open_queue(&self, name: &QueueName, access: AccessMode) -> Result<OpenedQueue, NativeStatus> {
        let queue = self.get_or_create_queue(name);
        let token = self.state.next_token.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(HandleState {
            queue,
            access,
            stale: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: Notify::new(),
        });
        self.state
            .handles
            .lock()
            .expect("provider lock poisoned")
            .insert(token, handle);
        Ok(OpenedQueue {
            handle: RawQueueHandle(token),
            kind: HandleKind::Emulated,
        })
    }

    fn close_queue(&self, handle: RawQueueHandle) {
        let removed = self
            .state
            .handles
            .lock()
            .expect("provider lock poisoned")
            .remove(&handle.0);
        if let Some(state) = removed {
            state.closed.store(true, Ordering::Release);
            state.events.notify_waiters();
        }
    }

    fn create_cursor(&self, handle: RawQueueHandle) -> Result<RawCursorHandle, NativeStatus> {
        let Some(state) = self.handle_state(handle) else {
            return Err(NativeStatus::Fatal(codes::INVALID_HANDLE));
        };
        if state.access == AccessMode::Send {
            return Err(NativeStatus::Fatal(codes::ILLEGAL_OPERATION));
        }
        let token = self.state.next_token.fetch_add(1, Ordering::Relaxed);
        self.state
            .cursors
            .lock()
            .expect("provider lock poisoned")
            .insert(
                token,
                CursorState {
                    queue: Arc::clone(&state.queue),
                    position: 0,
                },
            );
        Ok(RawCursorHandle(token))
    }

    fn close_cursor(&self, cursor: RawCursorHandle) {
        self.state
            .cursors
            .lock()
            .expect("provider lock poisoned")
            .remove(&cursor.0);
    }

    fn bind_completion(&self, _handle: RawQueueHandle) -> NativeStatus {
        // Emulated handles complete through spawned tasks; nothing to bind.
        NativeStatus::Ok
    }

    fn is_transactional(&self, name: &QueueName) -> Result<bool, NativeStatus> {
        Ok(self.get_or_create_queue(name).transactional)
    }

    fn format_name(&self, path: &str) -> Result<String, NativeStatus> {
        QueueName::parse(path)
            .map(|name| name.canonical())
            .map_err(|_| NativeStatus::Fatal(codes::QUEUE_NOT_FOUND))
    }

    fn begin_receive(
        &self,
        handle: RawQueueHandle,
        cursor: Option<RawCursorHandle>,
        action: ReceiveAction,
        timeout: Duration,
        _transaction: Option<TransactionToken>,
        mut package: PropertyPackage,
    ) -> ReceiveOutcome {
        let Some(state) = self.handle_state(handle) else {
            return ReceiveOutcome::Completed(
                NativeStatus::Fatal(codes::INVALID_HANDLE),
                package,
            );
        };

        // Synchronous-completion fast path.
        if let Some(status) = self
            .state
            .try_complete(&state, cursor, action, &mut package)
        {
            return ReceiveOutcome::Completed(status, package);
        }
        if timeout == Duration::ZERO {
            return ReceiveOutcome::Completed(NativeStatus::IoTimeout, package);
        }

        // Pending path: a completion task waits for an arrival, a handle
        // event, or the deadline, then reports through the channel.
        let (tx, rx) = oneshot::channel();
        let provider = Arc::clone(&self.state);
        tokio::spawn(async move {
            let deadline = (timeout != INFINITE_TIMEOUT).then(|| Instant::now() + timeout);
            loop {
                let arrival = state.queue.arrivals.notified();
                let event = state.events.notified();

                if let Some(status) =
                    provider.try_complete(&state, cursor, action, &mut package)
                {
                    let _ = tx.send((status, package));
                    return;
                }

                match deadline {
                    Some(deadline) => {
                        tokio::select! {
                            _ = arrival => {}
                            _ = event => {}
                            _ = tokio::time::sleep_until(deadline) => {
                                let _ = tx.send((NativeStatus::IoTimeout, package));
                                return;
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = arrival => {}
                            _ = event => {}
                        }
                    }
                }
            }
        });
        ReceiveOutcome::Pending(rx)
    }

    async fn send(
        &self,
        handle: RawQueueHandle,
        mut package: PropertyPackage,
        transaction: Option<TransactionToken>,
    ) -> (NativeStatus, PropertyPackage) {
        let Some(state) = self.handle_state(handle) else {
            return (NativeStatus::Fatal(codes::INVALID_HANDLE), package);
        };
        if state.closed.load(Ordering::Acquire) {
            return (NativeStatus::Fatal(codes::INVALID_HANDLE), package);
        }
        if state.stale.load(Ordering::Acquire) {
            return (NativeStatus::StaleHandle, package);
        }
        if state.access != AccessMode::Send {
            return (NativeStatus::Fatal(codes::ILLEGAL_OPERATION), package);
        }

        // A transactional queue demands a transaction, and vice versa.
        let queue_transactional = state.queue.transactional;
        if queue_transactional != transaction.is_some() {
            return (NativeStatus::Fatal(codes::TRANSACTION_USAGE), package);
        }

        let mut props = PropertyMarshal::new();
        for (id, value, _) in package.slots_mut() {
            props.set(id, value.clone());
        }

        let id = MessageId::generate(self.state.next_sequence.fetch_add(1, Ordering::Relaxed));
        props.set_id(PropertyId::Identifier, id.to_bytes());
        props.set_u16(PropertyId::Class, class::NORMAL);
        props.set_u32(PropertyId::ArrivedTime, Utc::now().timestamp() as u32);
        props.set_u64(
            PropertyId::LookupId,
            self.state.next_lookup.fetch_add(1, Ordering::Relaxed),
        );
        package.write_value(PropertyId::Identifier, PropertyValue::Id(id.to_bytes()));

        let stored = StoredMessage { props };
        match transaction {
            Some(TransactionToken::Within(txn)) => {
                let mut transactions = self
                    .state
                    .transactions
                    .lock()
                    .expect("provider lock poisoned");
                let Some(buffered) = transactions.get_mut(&txn.0) else {
                    return (NativeStatus::Fatal(codes::TRANSACTION_USAGE), package);
                };
                buffered.push(BufferedSend {
                    queue: Arc::clone(&state.queue),
                    stored,
                });
            }
            _ => ProviderState::deliver(&self.state, &state.queue, stored),
        }
        (NativeStatus::Ok, package)
    }

    fn begin_transaction(&self) -> Result<TransactionId, NativeStatus> {
        let token = self.state.next_token.fetch_add(1, Ordering::Relaxed);
        self.state
            .transactions
            .lock()
            .expect("provider lock poisoned")
            .insert(token, Vec::new());
        Ok(TransactionId(token))
    }

    fn commit_transaction(&self, transaction: TransactionId) -> NativeStatus {
        let removed = self
            .state
            .transactions
            .lock()
            .expect("provider lock poisoned")
            .remove(&transaction.0);
        match removed {
            Some(buffered) => {
                for send in buffered {
                    ProviderState::deliver(&self.state, &send.queue, send.stored);
                }
                NativeStatus::Ok
            }
            None => NativeStatus::Fatal(codes::TRANSACTION_USAGE),
        }
    }

    fn abort_transaction(&self, transaction: TransactionId) -> NativeStatus {
        let removed = self
            .state
            .transactions
            .lock()
            .expect("provider lock poisoned")
            .remove(&transaction.0);
        match removed {
            Some(_) => NativeStatus::Ok,
            None => NativeStatus::Fatal(codes::TRANSACTION_USAGE),
        }
    }
}
