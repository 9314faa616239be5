//! The wire envelope carried in every dispatch message body.
//!
//! An envelope is a JSON document with the request kind, a type tag naming
//! the handler, and the opaque payload. The type tag replaces runtime type
//! resolution: the receiving side looks the tag up in its
//! [`HandlerRegistry`](crate::handler::HandlerRegistry) instead of
//! materializing an arbitrary type from the wire.

use crate::error::DispatchError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body-type property value marking a JSON dispatch envelope
/// (ASCII "JSON").
pub const BODY_TYPE_JSON: u32 = 0x4A53_4F4E;

/// The two request flavors of the dispatch protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Fire-and-forget; no reply is produced.
    Command,
    /// Always produces a typed reply on the sender's response queue.
    Query,
}

/// One dispatch request as it crosses the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: RequestKind,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub payload: Value,
}

impl Envelope {
    /// Wrap a command payload.
    pub fn command<T: Serialize>(
        type_tag: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: RequestKind::Command,
            type_tag: type_tag.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Wrap a query payload.
    pub fn query<T: Serialize>(
        type_tag: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: RequestKind::Query,
            type_tag: type_tag.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Serialize to a message body.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a message body.
    ///
    /// A body that is not a well-formed envelope is a protocol violation;
    /// an envelope with an unknown type tag is not, and is rejected later
    /// by the handler lookup.
    pub fn decode(body: &[u8]) -> Result<Self, DispatchError> {
        serde_json::from_slice(body)
            .map_err(|e| DispatchError::protocol(format!("undecodable envelope: {}", e)))
    }

    /// Deserialize the payload into the handler's input type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
