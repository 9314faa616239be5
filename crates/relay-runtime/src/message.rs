//! Message types: identifiers, property filters, and the sparse message
//! structure that round-trips through the property marshal.

use crate::error::FormatError;
use crate::marshal::{PropertyId, PropertyMarshal, DEFAULT_BUFFER_CAPACITY, ID_SLOT_LEN};
use crate::name::QueueName;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Capacity used when requesting text slots for queue-name properties.
const QUEUE_NAME_CAPACITY: usize = 256;

/// Capacity used when requesting the label slot.
const LABEL_CAPACITY: usize = 128;

// ============================================================================
// Message Identity
// ============================================================================

/// A provider-assigned message identifier: a 16-byte GUID plus a 4-byte
/// sequence number. The default value means "no id".
///
/// Doubles as the correlation key for request/response matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId {
    guid: [u8; 16],
    sequence: u32,
}

impl MessageId {
    /// Construct from raw parts.
    pub fn new(guid: [u8; 16], sequence: u32) -> Self {
        Self { guid, sequence }
    }

    /// Mint a fresh identifier with a random GUID component.
    pub fn generate(sequence: u32) -> Self {
        Self {
            guid: *Uuid::new_v4().as_bytes(),
            sequence,
        }
    }

    /// True for the default "no id" value.
    pub fn is_none(&self) -> bool {
        self.guid == [0; 16] && self.sequence == 0
    }

    /// The GUID component.
    pub fn guid(&self) -> [u8; 16] {
        self.guid
    }

    /// The sequence component.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Marshal to the 20-byte wire layout.
    pub fn to_bytes(&self) -> [u8; ID_SLOT_LEN] {
        let mut out = [0u8; ID_SLOT_LEN];
        out[..16].copy_from_slice(&self.guid);
        out[16..].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }

    /// Unmarshal from the 20-byte wire layout.
    pub fn from_bytes(bytes: [u8; ID_SLOT_LEN]) -> Self {
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[..16]);
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&bytes[16..]);
        Self {
            guid,
            sequence: u32::from_le_bytes(seq),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", Uuid::from_bytes(self.guid), self.sequence)
    }
}

impl FromStr for MessageId {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (guid_text, seq_text) = s
            .rsplit_once('\\')
            .ok_or_else(|| FormatError::message_id(s, "missing sequence separator"))?;
        let guid = Uuid::parse_str(guid_text)
            .map_err(|e| FormatError::message_id(s, e.to_string()))?;
        let sequence = seq_text
            .parse::<u32>()
            .map_err(|e| FormatError::message_id(s, e.to_string()))?;
        Ok(Self {
            guid: *guid.as_bytes(),
            sequence,
        })
    }
}

// Serialized in the display form (`guid\sequence`).
impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Acknowledgment and Class Codes
// ============================================================================

/// Which delivery acknowledgments the sender requests on its admin queue.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckLevel {
    #[default]
    None = 0,
    NackReachQueue = 4,
    FullReachQueue = 5,
    NackReceive = 8,
    FullReceive = 14,
}

impl AckLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            4 => Self::NackReachQueue,
            5 => Self::FullReachQueue,
            8 => Self::NackReceive,
            14 => Self::FullReceive,
            _ => Self::None,
        }
    }

    /// True when arrival at the destination queue should be acknowledged.
    pub fn wants_arrival_ack(self) -> bool {
        matches!(self, Self::FullReachQueue | Self::FullReceive)
    }
}

/// Message class/status codes assigned by the provider.
pub mod class {
    /// An application message.
    pub const NORMAL: u16 = 0x0000;
    /// Positive acknowledgment: the message reached its queue.
    pub const ACK_REACH_QUEUE: u16 = 0x0002;
    /// Positive acknowledgment: the message was received.
    pub const ACK_RECEIVE: u16 = 0x4000;
    /// Negative acknowledgment: the destination queue was unreachable.
    pub const NACK_BAD_DESTINATION: u16 = 0x8000;
}

// ============================================================================
// Property Filter
// ============================================================================

/// Which properties a [`Message`] intends to carry.
///
/// Declared at construction; reading a property that was not requested
/// yields a type-appropriate default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilter {
    pub identifier: bool,
    pub correlation_id: bool,
    pub body: bool,
    pub body_type: bool,
    pub label: bool,
    pub response_queue: bool,
    pub admin_queue: bool,
    pub acknowledge: bool,
    pub class: bool,
    pub journal: bool,
    pub app_specific: bool,
    pub arrived_time: bool,
    pub lookup_id: bool,
    /// Initial capacity for the body buffer when receiving.
    pub body_capacity: usize,
}

impl Default for PropertyFilter {
    fn default() -> Self {
        Self {
            identifier: true,
            correlation_id: true,
            body: true,
            body_type: true,
            label: true,
            response_queue: true,
            admin_queue: false,
            acknowledge: false,
            class: true,
            journal: false,
            app_specific: false,
            arrived_time: false,
            lookup_id: false,
            body_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl PropertyFilter {
    /// The standard receive set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every property, for diagnostic reads.
    pub fn all() -> Self {
        Self {
            identifier: true,
            correlation_id: true,
            body: true,
            body_type: true,
            label: true,
            response_queue: true,
            admin_queue: true,
            acknowledge: true,
            class: true,
            journal: true,
            app_specific: true,
            arrived_time: true,
            lookup_id: true,
            body_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// The minimal set a correlation scan needs per peeked message.
    pub fn correlation_scan() -> Self {
        Self {
            identifier: true,
            correlation_id: true,
            body: false,
            body_type: false,
            label: false,
            response_queue: false,
            admin_queue: false,
            acknowledge: false,
            class: false,
            journal: false,
            app_specific: false,
            arrived_time: false,
            lookup_id: true,
            body_capacity: 0,
        }
    }

    /// Override the initial body buffer capacity.
    pub fn with_body_capacity(mut self, capacity: usize) -> Self {
        self.body_capacity = capacity;
        self
    }

    /// Also request arrival-time and lookup-id metadata.
    pub fn with_arrival_metadata(mut self) -> Self {
        self.arrived_time = true;
        self.lookup_id = true;
        self
    }

    /// Build the request marshal for a receive with this filter.
    pub fn request_marshal(&self) -> PropertyMarshal {
        let mut marshal = PropertyMarshal::new();
        if self.identifier {
            marshal.request_id(PropertyId::Identifier);
        }
        if self.correlation_id {
            marshal.request_id(PropertyId::CorrelationId);
        }
        if self.body {
            marshal.request_bytes(PropertyId::Body, self.body_capacity);
        }
        if self.body_type {
            marshal.request_u32(PropertyId::BodyType);
        }
        if self.label {
            marshal.request_string(PropertyId::Label, LABEL_CAPACITY);
        }
        if self.response_queue {
            marshal.request_string(PropertyId::ResponseQueue, QUEUE_NAME_CAPACITY);
        }
        if self.admin_queue {
            marshal.request_string(PropertyId::AdminQueue, QUEUE_NAME_CAPACITY);
        }
        if self.acknowledge {
            marshal.request_u32(PropertyId::Acknowledge);
        }
        if self.class {
            marshal.request_u16(PropertyId::Class);
        }
        if self.journal {
            marshal.request_u32(PropertyId::Journal);
        }
        if self.app_specific {
            marshal.request_u32(PropertyId::AppSpecific);
        }
        if self.arrived_time {
            marshal.request_u32(PropertyId::ArrivedTime);
        }
        if self.lookup_id {
            marshal.request_u64(PropertyId::LookupId);
        }
        marshal
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered, sparse set of named message properties.
///
/// Created fresh for a send, or materialized from a receive. The property
/// subset a received message carries is fixed by the [`PropertyFilter`] the
/// receive was issued with; unrequested properties read as defaults.
/// Underlying buffers are released on drop.
#[derive(Debug, Clone, Default)]
pub struct Message {
    id: MessageId,
    correlation_id: MessageId,
    body: Bytes,
    body_type: u32,
    label: String,
    response_queue: Option<QueueName>,
    admin_queue: Option<QueueName>,
    acknowledge: AckLevel,
    class: u16,
    journal: bool,
    app_specific: u32,
    time_to_reach_queue: Option<Duration>,
    time_to_be_received: Option<Duration>,
    arrived_at: Option<DateTime<Utc>>,
    lookup_id: u64,
    requested: PropertyFilter,
}

impl Message {
    /// Create a new message carrying `body`, ready to send.
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            requested: PropertyFilter::default(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_body_type(mut self, body_type: u32) -> Self {
        self.body_type = body_type;
        self
    }

    pub fn with_response_queue(mut self, queue: QueueName) -> Self {
        self.response_queue = Some(queue);
        self
    }

    pub fn with_admin_queue(mut self, queue: QueueName) -> Self {
        self.admin_queue = Some(queue);
        self
    }

    pub fn with_acknowledge(mut self, level: AckLevel) -> Self {
        self.acknowledge = level;
        self
    }

    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_app_specific(mut self, value: u32) -> Self {
        self.app_specific = value;
        self
    }

    pub fn with_time_to_reach_queue(mut self, ttl: Duration) -> Self {
        self.time_to_reach_queue = Some(ttl);
        self
    }

    pub fn with_time_to_be_received(mut self, ttl: Duration) -> Self {
        self.time_to_be_received = Some(ttl);
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn correlation_id(&self) -> MessageId {
        self.correlation_id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_type(&self) -> u32 {
        self.body_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn response_queue(&self) -> Option<&QueueName> {
        self.response_queue.as_ref()
    }

    pub fn admin_queue(&self) -> Option<&QueueName> {
        self.admin_queue.as_ref()
    }

    pub fn acknowledge(&self) -> AckLevel {
        self.acknowledge
    }

    pub fn class(&self) -> u16 {
        self.class
    }

    pub fn journal(&self) -> bool {
        self.journal
    }

    pub fn app_specific(&self) -> u32 {
        self.app_specific
    }

    pub fn time_to_reach_queue(&self) -> Option<Duration> {
        self.time_to_reach_queue
    }

    pub fn time_to_be_received(&self) -> Option<Duration> {
        self.time_to_be_received
    }

    pub fn arrived_at(&self) -> Option<DateTime<Utc>> {
        self.arrived_at
    }

    pub fn lookup_id(&self) -> u64 {
        self.lookup_id
    }

    /// The property subset this message declared at construction.
    pub fn requested(&self) -> &PropertyFilter {
        &self.requested
    }

    /// Build the marshal for sending this message.
    ///
    /// Absent properties are not marshaled at all; an identifier slot is
    /// always requested so the provider can write the assigned id back.
    pub fn to_send_marshal(&self) -> PropertyMarshal {
        let mut marshal = PropertyMarshal::new();
        marshal.request_id(PropertyId::Identifier);
        marshal.set_bytes(PropertyId::Body, &self.body);
        if self.body_type != 0 {
            marshal.set_u32(PropertyId::BodyType, self.body_type);
        }
        if !self.label.is_empty() {
            marshal.set_string(PropertyId::Label, &self.label);
        }
        if !self.correlation_id.is_none() {
            marshal.set_id(PropertyId::CorrelationId, self.correlation_id.to_bytes());
        }
        if let Some(queue) = &self.response_queue {
            marshal.set_string(PropertyId::ResponseQueue, &queue.canonical());
        }
        if let Some(queue) = &self.admin_queue {
            marshal.set_string(PropertyId::AdminQueue, &queue.canonical());
        }
        if self.acknowledge != AckLevel::None {
            marshal.set_u32(PropertyId::Acknowledge, u32::from(self.acknowledge.as_u8()));
        }
        if self.journal {
            marshal.set_u32(PropertyId::Journal, 1);
        }
        if self.app_specific != 0 {
            marshal.set_u32(PropertyId::AppSpecific, self.app_specific);
        }
        if let Some(ttl) = self.time_to_reach_queue {
            marshal.set_u32(PropertyId::TimeToReachQueue, ttl.as_secs() as u32);
        }
        if let Some(ttl) = self.time_to_be_received {
            marshal.set_u32(PropertyId::TimeToBeReceived, ttl.as_secs() as u32);
        }
        marshal
    }

    /// Materialize a message from a provider-filled marshal.
    pub fn from_marshal(
        marshal: PropertyMarshal,
        filter: &PropertyFilter,
    ) -> Result<Self, FormatError> {
        let mut message = Message {
            requested: filter.clone(),
            ..Self::default()
        };
        if filter.identifier {
            message.id = MessageId::from_bytes(marshal.get_id(PropertyId::Identifier));
        }
        if filter.correlation_id {
            message.correlation_id =
                MessageId::from_bytes(marshal.get_id(PropertyId::CorrelationId));
        }
        if filter.body {
            message.body = Bytes::copy_from_slice(marshal.get_bytes(PropertyId::Body));
        }
        if filter.body_type {
            message.body_type = marshal.get_u32(PropertyId::BodyType);
        }
        if filter.label {
            message.label = marshal.get_string(PropertyId::Label).to_string();
        }
        if filter.response_queue {
            message.response_queue = Self::parse_queue(marshal.get_string(PropertyId::ResponseQueue))?;
        }
        if filter.admin_queue {
            message.admin_queue = Self::parse_queue(marshal.get_string(PropertyId::AdminQueue))?;
        }
        if filter.acknowledge {
            message.acknowledge = AckLevel::from_u8(marshal.get_u32(PropertyId::Acknowledge) as u8);
        }
        if filter.class {
            message.class = marshal.get_u16(PropertyId::Class);
        }
        if filter.journal {
            message.journal = marshal.get_u32(PropertyId::Journal) != 0;
        }
        if filter.app_specific {
            message.app_specific = marshal.get_u32(PropertyId::AppSpecific);
        }
        if filter.arrived_time {
            let secs = marshal.get_u32(PropertyId::ArrivedTime);
            if secs != 0 {
                message.arrived_at = DateTime::<Utc>::from_timestamp(i64::from(secs), 0);
            }
        }
        if filter.lookup_id {
            message.lookup_id = marshal.get_u64(PropertyId::LookupId);
        }
        Ok(message)
    }

    fn parse_queue(text: &str) -> Result<Option<QueueName>, FormatError> {
        if text.is_empty() {
            Ok(None)
        } else {
            QueueName::parse(text).map(Some)
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
