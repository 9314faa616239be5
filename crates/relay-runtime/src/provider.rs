//! The abstract native queuing provider interface.
//!
//! The engine does not define any wire-level binary layout; it defines the
//! portable protocol a native provider must support: open/close, cursors,
//! synchronous-or-pending receives against a [`PropertyPackage`], sends,
//! transactional-nature queries, name translation, and a status
//! classification that drives the engine's retry behavior.

use crate::marshal::PropertyPackage;
use crate::name::QueueName;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Timeout value meaning "wait indefinitely".
pub const INFINITE_TIMEOUT: Duration = Duration::MAX;

/// Well-known fatal status codes.
pub mod codes {
    pub const QUEUE_NOT_FOUND: u32 = 0xC00E_0003;
    pub const ACCESS_DENIED: u32 = 0xC00E_0025;
    pub const INVALID_HANDLE: u32 = 0xC00E_0007;
    pub const ILLEGAL_OPERATION: u32 = 0xC00E_0064;
    pub const QUEUE_DELETED: u32 = 0xC00E_005A;
    pub const TRANSACTION_USAGE: u32 = 0xC00E_0050;
    pub const UNSUPPORTED_OPERATION: u32 = 0xC00E_0081;
}

// ============================================================================
// Status Classification
// ============================================================================

/// The portable classification of every native call result.
///
/// The engine's retry logic keys off this classification: overflow and
/// stale-handle are absorbed transparently, timeout becomes an absent
/// result, cancellation propagates, and fatal statuses surface as typed
/// provider errors carrying the native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    /// The call succeeded.
    Ok,
    /// The call succeeded with a benign informational code.
    Info(u32),
    /// A property buffer was too small; per-slot size hints are set.
    BufferOverflow,
    /// The handle was invalidated externally and must be reacquired.
    StaleHandle,
    /// The bounded wait elapsed without a message.
    IoTimeout,
    /// The operation was cancelled, typically by closing the handle.
    OperationCancelled,
    /// An unrecoverable provider failure carrying the native code.
    Fatal(u32),
}

impl NativeStatus {
    /// True for `Ok` and informational results.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Ok | Self::Info(_))
    }

    /// True for conditions the engine absorbs by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BufferOverflow | Self::StaleHandle)
    }

    /// True for unrecoverable failures.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Info(code) => write!(f, "info (0x{:08X})", code),
            Self::BufferOverflow => write!(f, "buffer overflow"),
            Self::StaleHandle => write!(f, "stale handle"),
            Self::IoTimeout => write!(f, "i/o timeout"),
            Self::OperationCancelled => write!(f, "operation cancelled"),
            Self::Fatal(code) => write!(f, "fatal status 0x{:08X}", code),
        }
    }
}

// ============================================================================
// Handles, Actions, Transactions
// ============================================================================

/// Opaque token for an open queue, minted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawQueueHandle(pub u64);

/// Opaque token for a cursor bound to a queue handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawCursorHandle(pub u64);

/// Whether a handle is kernel-backed.
///
/// Only kernel-backed handles can be bound to the asynchronous completion
/// mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Kernel,
    Emulated,
}

/// Access requested when opening a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Receive,
    Peek,
    Send,
}

/// What a receive call does with the matched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveAction {
    /// Consume the message.
    Receive,
    /// Inspect the message at the current position without consuming.
    PeekCurrent,
    /// Advance the cursor, then inspect without consuming.
    PeekNext,
}

/// Provider-side transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

/// How a send or receive participates in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionToken {
    /// The auto-commit single-message variant; no begin/commit required.
    Single,
    /// An explicit transaction created via `begin_transaction`.
    Within(TransactionId),
}

/// Result of opening a queue.
#[derive(Debug, Clone, Copy)]
pub struct OpenedQueue {
    pub handle: RawQueueHandle,
    pub kind: HandleKind,
}

/// Outcome of issuing a receive.
///
/// The package travels with the completion in both cases, so its buffers
/// stay pinned for exactly the duration of the native call.
pub enum ReceiveOutcome {
    /// The provider completed synchronously.
    Completed(NativeStatus, PropertyPackage),
    /// The provider went asynchronous; the terminal status arrives on the
    /// channel. A dropped sender is treated as cancellation.
    Pending(oneshot::Receiver<(NativeStatus, PropertyPackage)>),
}

impl fmt::Debug for ReceiveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(status, _) => f.debug_tuple("Completed").field(status).finish(),
            Self::Pending(_) => f.debug_tuple("Pending").finish(),
        }
    }
}

// ============================================================================
// Provider Interface
// ============================================================================

/// Interface implemented by native queuing providers.
///
/// `begin_receive` may complete synchronously or go pending; all other
/// operations complete inline. Close operations are infallible.
#[async_trait]
pub trait NativeQueueProvider: Send + Sync {
    /// Open a named queue for the requested access.
    fn open_queue(&self, name: &QueueName, access: AccessMode) -> Result<OpenedQueue, NativeStatus>;

    /// Close an open queue handle. Closing wakes pending receives on the
    /// handle with `OperationCancelled`.
    fn close_queue(&self, handle: RawQueueHandle);

    /// Create a cursor bound to a queue handle.
    fn create_cursor(&self, handle: RawQueueHandle) -> Result<RawCursorHandle, NativeStatus>;

    /// Close a cursor.
    fn close_cursor(&self, cursor: RawCursorHandle);

    /// Register a kernel-backed handle with the asynchronous completion
    /// mechanism. Idempotent.
    fn bind_completion(&self, handle: RawQueueHandle) -> NativeStatus;

    /// Report whether the named queue is transactional.
    fn is_transactional(&self, name: &QueueName) -> Result<bool, NativeStatus>;

    /// Translate a path-style name into its canonical wire form.
    fn format_name(&self, path: &str) -> Result<String, NativeStatus>;

    /// Issue a receive or peek against the handle (optionally through a
    /// cursor), filling the requested package slots.
    fn begin_receive(
        &self,
        handle: RawQueueHandle,
        cursor: Option<RawCursorHandle>,
        action: ReceiveAction,
        timeout: Duration,
        transaction: Option<TransactionToken>,
        package: PropertyPackage,
    ) -> ReceiveOutcome;

    /// Send the packaged message to the queue behind the handle.
    ///
    /// On success the provider writes the assigned identifier into the
    /// package's identifier slot, if one was requested.
    async fn send(
        &self,
        handle: RawQueueHandle,
        package: PropertyPackage,
        transaction: Option<TransactionToken>,
    ) -> (NativeStatus, PropertyPackage);

    /// Start an explicit transaction.
    fn begin_transaction(&self) -> Result<TransactionId, NativeStatus>;

    /// Commit an explicit transaction.
    fn commit_transaction(&self, transaction: TransactionId) -> NativeStatus;

    /// Abort an explicit transaction.
    fn abort_transaction(&self, transaction: TransactionId) -> NativeStatus;
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
