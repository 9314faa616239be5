//! # Relay Runtime
//!
//! Asynchronous, cursor-based queue I/O engine for point-to-point message
//! transport, with adaptive binary property marshaling.
//!
//! This library provides:
//! - Provider-agnostic queue operations over an abstract native interface
//! - Lazy, stale-recovering connection and handle management
//! - A sparse, typed property marshaling protocol with adaptive buffers
//! - An asynchronous receive state machine with overflow retry and
//!   cancellation
//! - Reader/writer/cursor operations, including a correlation scan
//! - An in-memory provider for testing and development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`name`] - Queue name parsing and normalization
//! - [`message`] - Message structures, identifiers and property filters
//! - [`marshal`] - Property marshaling across the native-call boundary
//! - [`handle`] - Reference-counted queue handle ownership
//! - [`provider`] - The abstract native provider interface
//! - [`connection`] - Per-queue handle caching and recovery
//! - [`receive`] - The asynchronous receive state machine
//! - [`reader`] / [`writer`] - Queue read/write operations and transactions

// Module declarations
pub mod connection;
pub mod error;
pub mod handle;
pub mod marshal;
pub mod message;
pub mod name;
pub mod provider;
pub mod providers;
pub mod reader;
pub mod receive;
pub mod writer;

// Re-export commonly used types at crate root for convenience
pub use connection::QueueConnection;
pub use error::{FormatError, QueueError};
pub use handle::QueueHandle;
pub use marshal::{PropertyId, PropertyMarshal, PropertyPackage, PropertyValue, SlotStatus};
pub use message::{class, AckLevel, Message, MessageId, PropertyFilter};
pub use name::{AddressScheme, QueueKind, QueueName};
pub use provider::{
    AccessMode, HandleKind, NativeQueueProvider, NativeStatus, OpenedQueue, RawCursorHandle,
    RawQueueHandle, ReceiveAction, ReceiveOutcome, TransactionId, TransactionToken,
    INFINITE_TIMEOUT,
};
pub use providers::InMemoryProvider;
pub use reader::{QueueCursor, QueueReader};
pub use receive::{ReceiveOperation, ReceiveRequest};
pub use writer::{QueueTransaction, QueueWriter, TransactionMode};
