//! # Relay Dispatch
//!
//! Command/query request/response messaging layered on the queue transport
//! from `relay-runtime`.
//!
//! Requests travel as JSON envelopes carrying a request kind and a type
//! tag. A [`DispatchClient`] submits fire-and-forget commands and runs
//! queries whose replies are matched by correlation id on a local reply
//! queue. A [`DispatchServer`] reads an inbound queue and fans requests out
//! to typed handlers from a [`HandlerRegistry`].
//!
//! ## Module Organization
//!
//! - [`envelope`] - The JSON wire envelope and request kinds
//! - [`handler`] - Typed handler registration keyed by type tag
//! - [`client`] - Command submission and query execution
//! - [`server`] - The inbound receive loop and worker loops
//! - [`error`] - Error types for dispatch operations

// Module declarations
pub mod client;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod server;

// Re-export commonly used types at crate root for convenience
pub use client::DispatchClient;
pub use envelope::{Envelope, RequestKind, BODY_TYPE_JSON};
pub use error::DispatchError;
pub use handler::{HandlerError, HandlerRegistry};
pub use server::DispatchServer;
