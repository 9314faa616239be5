//! Typed handler registration keyed by envelope type tag.
//!
//! Handlers are registered against a type tag with their natural input and
//! output types; the registry erases them through `serde_json::Value` so
//! the server loops can invoke any handler from a decoded envelope without
//! knowing its concrete types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Failure raised by (or on behalf of) a registered handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type CommandFn = Box<dyn Fn(Value) -> BoxFuture<Result<(), HandlerError>> + Send + Sync>;
type QueryFn = Box<dyn Fn(Value) -> BoxFuture<Result<Value, HandlerError>> + Send + Sync>;

/// The set of command and query handlers a server dispatches to.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<String, CommandFn>,
    queries: HashMap<String, QueryFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler for a type tag, replacing any previous
    /// registration.
    pub fn command<T, F, Fut>(mut self, type_tag: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let tag = type_tag.into();
        let erased: CommandFn = Box::new(move |payload| match serde_json::from_value::<T>(payload)
        {
            Ok(input) => Box::pin(handler(input)),
            Err(e) => Box::pin(std::future::ready(Err(HandlerError::new(format!(
                "malformed payload: {}",
                e
            ))))),
        });
        self.commands.insert(tag, erased);
        self
    }

    /// Register a query handler for a type tag, replacing any previous
    /// registration. The result type is serialized back to a value for the
    /// reply body.
    pub fn query<T, R, F, Fut>(mut self, type_tag: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        let tag = type_tag.into();
        let erased: QueryFn = Box::new(move |payload| match serde_json::from_value::<T>(payload) {
            Ok(input) => {
                let pending = handler(input);
                Box::pin(async move {
                    let result = pending.await?;
                    serde_json::to_value(result)
                        .map_err(|e| HandlerError::new(format!("unserializable result: {}", e)))
                })
            }
            Err(e) => Box::pin(std::future::ready(Err(HandlerError::new(format!(
                "malformed payload: {}",
                e
            ))))),
        });
        self.queries.insert(tag, erased);
        self
    }

    /// Whether a command handler is registered for the tag.
    pub fn has_command(&self, type_tag: &str) -> bool {
        self.commands.contains_key(type_tag)
    }

    /// Whether a query handler is registered for the tag.
    pub fn has_query(&self, type_tag: &str) -> bool {
        self.queries.contains_key(type_tag)
    }

    /// Invoke the command handler for a tag.
    pub async fn run_command(&self, type_tag: &str, payload: Value) -> Result<(), HandlerError> {
        match self.commands.get(type_tag) {
            Some(handler) => handler(payload).await,
            None => Err(HandlerError::new(format!(
                "no command handler for '{}'",
                type_tag
            ))),
        }
    }

    /// Invoke the query handler for a tag, yielding the serialized result.
    pub async fn run_query(&self, type_tag: &str, payload: Value) -> Result<Value, HandlerError> {
        match self.queries.get(type_tag) {
            Some(handler) => handler(payload).await,
            None => Err(HandlerError::new(format!(
                "no query handler for '{}'",
                type_tag
            ))),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
