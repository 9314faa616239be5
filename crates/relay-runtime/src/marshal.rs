//! Sparse, typed property marshaling for native queue calls.
//!
//! A [`PropertyMarshal`] holds an independently present-or-absent slot per
//! property. [`PropertyMarshal::pack`] converts the set into a
//! [`PropertyPackage`], the parallel arrays of ids, tagged values, and
//! per-slot status codes that cross the native-call boundary. When the
//! native call reports a buffer overflow, [`PropertyPackage::adjust`] grows
//! the affected buffers to the reported required sizes so the caller can
//! retry the same package.
//!
//! Absent properties are never marshaled as zero-length values; a slot that
//! was never set simply does not appear in the package.

use std::collections::BTreeMap;

/// Initial capacity for variable-length slots when no better guess exists.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Size in bytes of a marshaled message identifier (16-byte GUID + u32
/// sequence number).
pub const ID_SLOT_LEN: usize = 20;

// ============================================================================
// Property Identifiers
// ============================================================================

/// Native numeric identifiers for message properties.
///
/// The discriminants are the wire-level property ids the native provider
/// understands; they are stable and must not be reordered.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyId {
    Class = 1,
    Identifier = 2,
    CorrelationId = 3,
    Delivery = 5,
    Acknowledge = 6,
    Journal = 7,
    AppSpecific = 8,
    Body = 9,
    BodyType = 42,
    Label = 11,
    TimeToReachQueue = 13,
    TimeToBeReceived = 14,
    ResponseQueue = 15,
    AdminQueue = 17,
    ArrivedTime = 32,
    LookupId = 60,
}

impl PropertyId {
    /// Native numeric id for this property.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

// ============================================================================
// Tagged Property Values
// ============================================================================

/// A byte buffer slot with an adjustable capacity.
///
/// `data.len()` is the slot capacity; `len` is the logical length of the
/// value currently held. Capacity only ever grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSlot {
    data: Vec<u8>,
    len: usize,
}

impl BufferSlot {
    /// Create an empty slot with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
        }
    }

    /// Create a slot holding `value`, growing capacity if needed.
    pub fn from_bytes(value: &[u8]) -> Self {
        let mut slot = Self::with_capacity(value.len().max(DEFAULT_BUFFER_CAPACITY));
        slot.set(value);
        slot
    }

    /// Store `value`, reusing the existing buffer when large enough.
    pub fn set(&mut self, value: &[u8]) {
        if value.len() > self.data.len() {
            self.data.resize(value.len(), 0);
        }
        self.data[..value.len()].copy_from_slice(value);
        self.len = value.len();
    }

    /// The logical value held by the slot.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Current capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no value is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow capacity to at least `required`. Never shrinks.
    pub fn grow_to(&mut self, required: usize) {
        if required > self.data.len() {
            self.data.resize(required, 0);
        }
    }

    /// Provider-side write: copy `value` in and record its length.
    ///
    /// Fails (returning the required size) when capacity is insufficient;
    /// the slot contents are left untouched in that case.
    pub fn write(&mut self, value: &[u8]) -> Result<(), usize> {
        if value.len() > self.data.len() {
            return Err(value.len());
        }
        self.data[..value.len()].copy_from_slice(value);
        self.len = value.len();
        Ok(())
    }
}

/// A NUL-terminated text slot.
///
/// The marshaled length always includes the terminator, so an empty string
/// still has length 1 on the wire. Accessors strip the terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSlot {
    data: Vec<u8>,
    len: usize,
}

impl TextSlot {
    /// Create an empty slot with the given capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(1)],
            len: 0,
        }
    }

    /// Create a slot holding `value`.
    pub fn from_str(value: &str) -> Self {
        let mut slot = Self::with_capacity((value.len() + 1).max(DEFAULT_BUFFER_CAPACITY));
        slot.set(value);
        slot
    }

    /// Store `value`, reusing the existing buffer when large enough.
    pub fn set(&mut self, value: &str) {
        let needed = value.len() + 1;
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
        self.data[..value.len()].copy_from_slice(value.as_bytes());
        self.data[value.len()] = 0;
        self.len = needed;
    }

    /// The text held by the slot, without the terminator.
    pub fn as_str(&self) -> &str {
        if self.len == 0 {
            return "";
        }
        // Terminator is always present when len > 0.
        std::str::from_utf8(&self.data[..self.len - 1]).unwrap_or("")
    }

    /// Current capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Marshaled length in bytes, terminator included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no value is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow capacity to at least `required`. Never shrinks.
    pub fn grow_to(&mut self, required: usize) {
        if required > self.data.len() {
            self.data.resize(required, 0);
        }
    }

    /// Provider-side write: copy `value` plus terminator in.
    ///
    /// Fails (returning the required size, terminator included) when
    /// capacity is insufficient.
    pub fn write(&mut self, value: &str) -> Result<(), usize> {
        let needed = value.len() + 1;
        if needed > self.data.len() {
            return Err(needed);
        }
        self.data[..value.len()].copy_from_slice(value.as_bytes());
        self.data[value.len()] = 0;
        self.len = needed;
        Ok(())
    }
}

/// A tagged property value.
///
/// Scalars are fixed-size; `Buffer` and `Text` carry adjustable buffers;
/// `Id` is the fixed 20-byte message-identifier layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Buffer(BufferSlot),
    Text(TextSlot),
    Id([u8; ID_SLOT_LEN]),
}

impl PropertyValue {
    /// True when both values use the same tag.
    fn same_shape(&self, other: &PropertyValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

// ============================================================================
// PropertyMarshal
// ============================================================================

/// A sparse set of typed properties keyed by native property id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMarshal {
    slots: BTreeMap<PropertyId, PropertyValue>,
}

impl PropertyMarshal {
    /// Create an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of present properties.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no property is present.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check whether a property is present.
    pub fn contains(&self, id: PropertyId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Store a raw value, replacing any previous slot wholesale.
    pub fn set(&mut self, id: PropertyId, value: PropertyValue) {
        self.slots.insert(id, value);
    }

    pub fn set_u8(&mut self, id: PropertyId, value: u8) {
        self.slots.insert(id, PropertyValue::U8(value));
    }

    pub fn set_u16(&mut self, id: PropertyId, value: u16) {
        self.slots.insert(id, PropertyValue::U16(value));
    }

    pub fn set_u32(&mut self, id: PropertyId, value: u32) {
        self.slots.insert(id, PropertyValue::U32(value));
    }

    pub fn set_u64(&mut self, id: PropertyId, value: u64) {
        self.slots.insert(id, PropertyValue::U64(value));
    }

    /// Store a byte-array value, reusing the slot's buffer when possible.
    pub fn set_bytes(&mut self, id: PropertyId, value: &[u8]) {
        match self.slots.get_mut(&id) {
            Some(PropertyValue::Buffer(slot)) => slot.set(value),
            _ => {
                self.slots
                    .insert(id, PropertyValue::Buffer(BufferSlot::from_bytes(value)));
            }
        }
    }

    /// Store a string value, reusing the slot's buffer when possible.
    pub fn set_string(&mut self, id: PropertyId, value: &str) {
        match self.slots.get_mut(&id) {
            Some(PropertyValue::Text(slot)) => slot.set(value),
            _ => {
                self.slots
                    .insert(id, PropertyValue::Text(TextSlot::from_str(value)));
            }
        }
    }

    /// Store a 20-byte identifier value.
    pub fn set_id(&mut self, id: PropertyId, value: [u8; ID_SLOT_LEN]) {
        self.slots.insert(id, PropertyValue::Id(value));
    }

    /// Request an empty byte-array slot for the provider to fill.
    pub fn request_bytes(&mut self, id: PropertyId, capacity: usize) {
        self.slots
            .insert(id, PropertyValue::Buffer(BufferSlot::with_capacity(capacity)));
    }

    /// Request an empty text slot for the provider to fill.
    pub fn request_string(&mut self, id: PropertyId, capacity: usize) {
        self.slots
            .insert(id, PropertyValue::Text(TextSlot::with_capacity(capacity)));
    }

    /// Request an identifier slot for the provider to fill.
    pub fn request_id(&mut self, id: PropertyId) {
        self.slots.insert(id, PropertyValue::Id([0; ID_SLOT_LEN]));
    }

    /// Request a scalar slot for the provider to fill.
    pub fn request_u32(&mut self, id: PropertyId) {
        self.slots.insert(id, PropertyValue::U32(0));
    }

    /// Request a 16-bit scalar slot for the provider to fill.
    pub fn request_u16(&mut self, id: PropertyId) {
        self.slots.insert(id, PropertyValue::U16(0));
    }

    /// Request a 64-bit scalar slot for the provider to fill.
    pub fn request_u64(&mut self, id: PropertyId) {
        self.slots.insert(id, PropertyValue::U64(0));
    }

    /// Raw access to a slot value.
    pub fn value(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.slots.get(&id)
    }

    pub fn get_u8(&self, id: PropertyId) -> u8 {
        match self.slots.get(&id) {
            Some(PropertyValue::U8(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_u16(&self, id: PropertyId) -> u16 {
        match self.slots.get(&id) {
            Some(PropertyValue::U16(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_u32(&self, id: PropertyId) -> u32 {
        match self.slots.get(&id) {
            Some(PropertyValue::U32(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_u64(&self, id: PropertyId) -> u64 {
        match self.slots.get(&id) {
            Some(PropertyValue::U64(v)) => *v,
            _ => 0,
        }
    }

    /// Byte-array value, or empty when absent.
    pub fn get_bytes(&self, id: PropertyId) -> &[u8] {
        match self.slots.get(&id) {
            Some(PropertyValue::Buffer(slot)) => slot.as_slice(),
            _ => &[],
        }
    }

    /// String value, or empty when absent.
    pub fn get_string(&self, id: PropertyId) -> &str {
        match self.slots.get(&id) {
            Some(PropertyValue::Text(slot)) => slot.as_str(),
            _ => "",
        }
    }

    /// Identifier value, or all-zero when absent.
    pub fn get_id(&self, id: PropertyId) -> [u8; ID_SLOT_LEN] {
        match self.slots.get(&id) {
            Some(PropertyValue::Id(v)) => *v,
            _ => [0; ID_SLOT_LEN],
        }
    }

    /// Produce the native-call-ready package, consuming the set.
    ///
    /// The package pins the slot buffers until [`PropertyPackage::unpack`]
    /// hands them back.
    pub fn pack(self) -> PropertyPackage {
        let mut ids = Vec::with_capacity(self.slots.len());
        let mut values = Vec::with_capacity(self.slots.len());
        let mut statuses = Vec::with_capacity(self.slots.len());
        for (id, value) in self.slots {
            ids.push(id);
            values.push(value);
            statuses.push(SlotStatus::Ok);
        }
        PropertyPackage {
            ids,
            values,
            statuses,
        }
    }
}

// ============================================================================
// PropertyPackage
// ============================================================================

/// Per-slot status reported by the native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotStatus {
    /// Slot transferred without issue.
    #[default]
    Ok,
    /// Slot buffer was too small; `required` is the size hint to grow to.
    Overflow { required: usize },
    /// The provider did not touch this slot.
    Ignored,
}

/// A native-call bundle: parallel arrays of property ids, tagged values,
/// and per-slot status codes.
///
/// Ownership transfers to the provider for the duration of a call and is
/// always returned with the completion, so buffers are released exactly
/// once on every path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPackage {
    ids: Vec<PropertyId>,
    values: Vec<PropertyValue>,
    statuses: Vec<SlotStatus>,
}

impl PropertyPackage {
    /// Number of marshaled slots.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no slot is marshaled.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The marshaled property ids, in slot order.
    pub fn ids(&self) -> &[PropertyId] {
        &self.ids
    }

    /// Read access to a slot by property id.
    pub fn value(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.position(id).map(|i| &self.values[i])
    }

    /// Status of a slot by property id.
    pub fn status(&self, id: PropertyId) -> Option<SlotStatus> {
        self.position(id).map(|i| self.statuses[i])
    }

    /// Provider-side access to a slot and its status cell.
    pub fn slot_mut(&mut self, id: PropertyId) -> Option<(&mut PropertyValue, &mut SlotStatus)> {
        let i = self.position(id)?;
        Some((&mut self.values[i], &mut self.statuses[i]))
    }

    /// Provider-side iteration over all slots.
    pub fn slots_mut(
        &mut self,
    ) -> impl Iterator<Item = (PropertyId, &mut PropertyValue, &mut SlotStatus)> {
        self.ids
            .iter()
            .copied()
            .zip(self.values.iter_mut().zip(self.statuses.iter_mut()))
            .map(|(id, (value, status))| (id, value, status))
    }

    /// True when any slot reported an overflow.
    pub fn has_overflow(&self) -> bool {
        self.statuses
            .iter()
            .any(|s| matches!(s, SlotStatus::Overflow { .. }))
    }

    /// Grow every overflowed slot to its reported required size.
    ///
    /// Buffers are never shrunk. Returns `true` when at least one buffer
    /// grew; a `false` return on an overflow status means the size hints
    /// were unusable and the caller must not retry.
    pub fn adjust(&mut self) -> bool {
        let mut grew = false;
        for (value, status) in self.values.iter_mut().zip(self.statuses.iter_mut()) {
            let SlotStatus::Overflow { required } = *status else {
                continue;
            };
            match value {
                PropertyValue::Buffer(slot) => {
                    if required > slot.capacity() {
                        slot.grow_to(required);
                        grew = true;
                    }
                }
                PropertyValue::Text(slot) => {
                    if required > slot.capacity() {
                        slot.grow_to(required);
                        grew = true;
                    }
                }
                // Fixed-size slots cannot overflow; an overflow status here
                // is a provider bug and is left for the caller to surface.
                _ => continue,
            }
            *status = SlotStatus::Ok;
        }
        grew
    }

    /// Replace a slot value in place, preserving the tag shape.
    ///
    /// Used by providers to write scalar and identifier results back.
    /// Returns `false` when the property is absent or the shape differs.
    pub fn write_value(&mut self, id: PropertyId, value: PropertyValue) -> bool {
        match self.slot_mut(id) {
            Some((slot, status)) if slot.same_shape(&value) => {
                *slot = value;
                *status = SlotStatus::Ok;
                true
            }
            _ => false,
        }
    }

    /// Read back the property set, completing the round trip.
    pub fn unpack(self) -> PropertyMarshal {
        let mut slots = BTreeMap::new();
        for (id, value) in self.ids.into_iter().zip(self.values) {
            slots.insert(id, value);
        }
        PropertyMarshal { slots }
    }

    fn position(&self, id: PropertyId) -> Option<usize> {
        self.ids.iter().position(|&i| i == id)
    }
}

#[cfg(test)]
#[path = "marshal_tests.rs"]
mod tests;
