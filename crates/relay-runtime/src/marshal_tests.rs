//! Tests for property marshaling.

use super::*;

mod slots {
    use super::*;

    /// Verify that first assignment sizes a buffer slot to the initial
    /// guess and that small values reuse it.
    #[test]
    fn test_buffer_slot_initial_capacity_and_reuse() {
        let mut slot = BufferSlot::from_bytes(b"abc");
        assert_eq!(slot.capacity(), DEFAULT_BUFFER_CAPACITY);
        assert_eq!(slot.as_slice(), b"abc");

        slot.set(b"defg");
        assert_eq!(slot.capacity(), DEFAULT_BUFFER_CAPACITY);
        assert_eq!(slot.as_slice(), b"defg");
    }

    /// Verify that oversized values grow the buffer.
    #[test]
    fn test_buffer_slot_grows_for_large_values() {
        let big = vec![7u8; DEFAULT_BUFFER_CAPACITY * 2];
        let mut slot = BufferSlot::from_bytes(&big);
        assert_eq!(slot.capacity(), big.len());

        // Shrinking never happens on reassignment.
        slot.set(b"tiny");
        assert_eq!(slot.capacity(), big.len());
        assert_eq!(slot.as_slice(), b"tiny");
    }

    /// Verify provider-side writes report the required size on overflow
    /// and leave the slot untouched.
    #[test]
    fn test_buffer_slot_write_overflow() {
        let mut slot = BufferSlot::with_capacity(4);
        assert_eq!(slot.write(b"toolong"), Err(7));
        assert!(slot.is_empty());

        slot.grow_to(7);
        assert_eq!(slot.write(b"toolong"), Ok(()));
        assert_eq!(slot.as_slice(), b"toolong");
    }

    /// Verify that text length always includes the terminator.
    #[test]
    fn test_text_slot_terminator_accounting() {
        let mut slot = TextSlot::from_str("hello");
        assert_eq!(slot.len(), 6);
        assert_eq!(slot.as_str(), "hello");

        slot.set("");
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.as_str(), "");
    }

    /// Verify text overflow reports the terminator-inclusive size.
    #[test]
    fn test_text_slot_write_overflow() {
        let mut slot = TextSlot::with_capacity(3);
        assert_eq!(slot.write("abc"), Err(4));
        slot.grow_to(4);
        assert_eq!(slot.write("abc"), Ok(()));
        assert_eq!(slot.as_str(), "abc");
    }
}

mod marshal {
    use super::*;

    /// Verify defaults for absent properties.
    #[test]
    fn test_absent_properties_read_as_defaults() {
        let marshal = PropertyMarshal::new();
        assert!(marshal.is_empty());
        assert_eq!(marshal.get_u32(PropertyId::BodyType), 0);
        assert_eq!(marshal.get_bytes(PropertyId::Body), &[] as &[u8]);
        assert_eq!(marshal.get_string(PropertyId::Label), "");
        assert_eq!(marshal.get_id(PropertyId::Identifier), [0; ID_SLOT_LEN]);
        assert!(!marshal.contains(PropertyId::Body));
    }

    /// Verify that absent properties are not marshaled at all, rather than
    /// as zero-length values.
    #[test]
    fn test_absent_properties_not_packed() {
        let mut marshal = PropertyMarshal::new();
        marshal.set_u32(PropertyId::BodyType, 3);
        let package = marshal.pack();
        assert_eq!(package.len(), 1);
        assert!(package.value(PropertyId::Body).is_none());
        assert!(package.status(PropertyId::Body).is_none());
    }

    /// Verify marshal idempotence: `unpack(pack(set(id, v))) == v` for
    /// every supported property type.
    #[test]
    fn test_pack_unpack_round_trip_all_types() {
        let mut marshal = PropertyMarshal::new();
        marshal.set_u8(PropertyId::Delivery, 1);
        marshal.set_u16(PropertyId::Class, 0x4000);
        marshal.set_u32(PropertyId::BodyType, 77);
        marshal.set_u64(PropertyId::LookupId, u64::MAX - 3);
        marshal.set_bytes(PropertyId::Body, b"payload bytes");
        marshal.set_string(PropertyId::Label, "invoice.created");
        let id = [9u8; ID_SLOT_LEN];
        marshal.set_id(PropertyId::Identifier, id);

        let unpacked = marshal.clone().pack().unpack();
        assert_eq!(unpacked.get_u8(PropertyId::Delivery), 1);
        assert_eq!(unpacked.get_u16(PropertyId::Class), 0x4000);
        assert_eq!(unpacked.get_u32(PropertyId::BodyType), 77);
        assert_eq!(unpacked.get_u64(PropertyId::LookupId), u64::MAX - 3);
        assert_eq!(unpacked.get_bytes(PropertyId::Body), b"payload bytes");
        assert_eq!(unpacked.get_string(PropertyId::Label), "invoice.created");
        assert_eq!(unpacked.get_id(PropertyId::Identifier), id);
        assert_eq!(unpacked, marshal);
    }

    /// Verify buffer reuse across reassignments of the same property.
    #[test]
    fn test_set_bytes_reuses_slot_buffer() {
        let mut marshal = PropertyMarshal::new();
        marshal.set_bytes(PropertyId::Body, b"first");
        marshal.set_bytes(PropertyId::Body, b"second value");
        assert_eq!(marshal.get_bytes(PropertyId::Body), b"second value");

        match marshal.value(PropertyId::Body) {
            Some(PropertyValue::Buffer(slot)) => {
                assert_eq!(slot.capacity(), DEFAULT_BUFFER_CAPACITY);
            }
            other => panic!("unexpected slot: {:?}", other),
        }
    }
}

mod package {
    use super::*;

    fn package_with_small_body(capacity: usize) -> PropertyPackage {
        let mut marshal = PropertyMarshal::new();
        marshal.request_bytes(PropertyId::Body, capacity);
        marshal.request_id(PropertyId::Identifier);
        marshal.pack()
    }

    /// Verify that adjust grows overflowed buffers to the reported size
    /// and clears their status.
    #[test]
    fn test_adjust_grows_to_required_size() {
        let mut package = package_with_small_body(8);
        {
            let (value, status) = package.slot_mut(PropertyId::Body).unwrap();
            match value {
                PropertyValue::Buffer(slot) => assert_eq!(slot.write(&[1; 64]), Err(64)),
                other => panic!("unexpected slot: {:?}", other),
            }
            *status = SlotStatus::Overflow { required: 64 };
        }
        assert!(package.has_overflow());
        assert!(package.adjust());
        assert!(!package.has_overflow());

        let (value, _) = package.slot_mut(PropertyId::Body).unwrap();
        match value {
            PropertyValue::Buffer(slot) => {
                assert_eq!(slot.capacity(), 64);
                assert_eq!(slot.write(&[1; 64]), Ok(()));
            }
            other => panic!("unexpected slot: {:?}", other),
        }
    }

    /// Verify growth monotonicity: repeated adjust calls never shrink a
    /// buffer, and an already-large buffer does not count as growth.
    #[test]
    fn test_adjust_never_shrinks() {
        let mut package = package_with_small_body(128);
        {
            let (_, status) = package.slot_mut(PropertyId::Body).unwrap();
            *status = SlotStatus::Overflow { required: 16 };
        }
        // Required size below capacity: status clears but nothing grows.
        assert!(!package.adjust());
        let (value, _) = package.slot_mut(PropertyId::Body).unwrap();
        match value {
            PropertyValue::Buffer(slot) => assert_eq!(slot.capacity(), 128),
            other => panic!("unexpected slot: {:?}", other),
        }
    }

    /// Verify that write_value replaces same-shape slots only.
    #[test]
    fn test_write_value_respects_shape() {
        let mut package = package_with_small_body(8);
        assert!(package.write_value(
            PropertyId::Identifier,
            PropertyValue::Id([3; ID_SLOT_LEN])
        ));
        assert!(!package.write_value(PropertyId::Identifier, PropertyValue::U32(1)));
        assert!(!package.write_value(PropertyId::Label, PropertyValue::U32(1)));

        let unpacked = package.unpack();
        assert_eq!(unpacked.get_id(PropertyId::Identifier), [3; ID_SLOT_LEN]);
    }
}
