// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use indexmap::indexmap;

fn roundtrip(v: Value) {
    let bytes = encode(&v);
    let decoded = decode(&bytes).expect("decode should succeed");
    assert_eq!(decoded, v, "round trip mismatch for {bytes:x?}");
}

#[test]
fn nil_roundtrips() {
    roundtrip(Value::Nil);
}

#[test]
fn bools_roundtrip() {
    roundtrip(Value::Bool(true));
    roundtrip(Value::Bool(false));
}

#[test]
fn small_uint_uses_positive_fixint() {
    let bytes = encode(&Value::uint(42));
    assert_eq!(bytes, vec![42]);
}

#[test]
fn small_negative_uses_negative_fixint() {
    let bytes = encode(&Value::int(-5));
    assert_eq!(bytes, vec![0xfb]); // -5 as i8 -> 0xfb
}

#[test]
fn narrowest_tag_is_chosen_per_magnitude() {
    assert_eq!(encode(&Value::uint(255))[0], 0xcc);
    assert_eq!(encode(&Value::uint(256))[0], 0xcd);
    assert_eq!(encode(&Value::uint(65536))[0], 0xce);
    assert_eq!(encode(&Value::uint(1u64 << 32))[0], 0xcf);
    assert_eq!(encode(&Value::int(-33))[0], 0xd0);
    assert_eq!(encode(&Value::int(i16::MIN as i64 - 1))[0], 0xd2);
}

#[test]
fn integers_roundtrip_across_the_64_bit_range() {
    roundtrip(Value::int(0));
    roundtrip(Value::int(-1));
    roundtrip(Value::int(i64::MIN));
    roundtrip(Value::int(i64::MAX));
    roundtrip(Value::uint(u64::MAX));
    roundtrip(Value::uint((1u64 << 53) + 1));
}

#[test]
fn unsigned_value_beyond_i64_normalizes_but_still_roundtrips() {
    let big = u64::MAX;
    let v = Value::Int(Integer::from(big));
    assert_eq!(v, Value::Int(Integer::Unsigned(big)));
    roundtrip(v);

    // A u64 that fits in i64 normalizes to Signed, so from_u64/from_i64 agree.
    assert_eq!(Integer::from(5u64), Integer::from(5i64));
}

#[test]
fn floats_roundtrip() {
    roundtrip(Value::Float32(1.5));
    roundtrip(Value::Float64(std::f64::consts::PI));
}

#[test]
fn strings_roundtrip_across_width_tiers() {
    roundtrip(Value::str(""));
    roundtrip(Value::str("hello"));
    roundtrip(Value::str("x".repeat(40))); // beyond fixstr's 31-byte limit
    roundtrip(Value::str("x".repeat(300))); // beyond str8's 255-byte limit
}

#[test]
fn binary_roundtrips() {
    roundtrip(Value::Binary(vec![]));
    roundtrip(Value::Binary(vec![1, 2, 3, 255]));
}

#[test]
fn arrays_roundtrip_including_nested() {
    roundtrip(Value::Array(vec![Value::int(1), Value::str("two"), Value::Bool(true)]));
    roundtrip(Value::Array((0..20).map(Value::int).collect())); // beyond fixarray's 15-item limit
}

#[test]
fn maps_preserve_insertion_order() {
    let map = indexmap! {
        "z".to_string() => Value::int(1),
        "a".to_string() => Value::int(2),
        "m".to_string() => Value::int(3),
    };
    let v = Value::Map(map);
    let bytes = encode(&v);
    let decoded = decode(&bytes).unwrap();
    let decoded_map = decoded.as_map().unwrap();
    let keys: Vec<_> = decoded_map.keys().collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
}

#[test]
fn undefined_map_values_are_omitted_not_nulled() {
    let map = indexmap! {
        "present".to_string() => Value::int(1),
        "missing".to_string() => Value::Undefined,
    };
    let bytes = encode(&Value::Map(map));
    let decoded = decode(&bytes).unwrap();
    let decoded_map = decoded.as_map().unwrap();
    assert_eq!(decoded_map.len(), 1);
    assert!(decoded_map.contains_key("present"));
    assert!(!decoded_map.contains_key("missing"));
}

#[test]
fn timestamp_32_bit_width_for_whole_seconds_in_range() {
    let ts = Timestamp::new(1_700_000_000, 0);
    let bytes = encode(&Value::Timestamp(ts));
    assert_eq!(bytes[0], 0xd6); // fixext4
    roundtrip(Value::Timestamp(ts));
}

#[test]
fn timestamp_64_bit_width_when_nanoseconds_present() {
    let ts = Timestamp::new(1_700_000_000, 500_000_000);
    let bytes = encode(&Value::Timestamp(ts));
    assert_eq!(bytes[0], 0xd7); // fixext8
    roundtrip(Value::Timestamp(ts));
}

#[test]
fn timestamp_96_bit_width_for_negative_or_out_of_range_seconds() {
    let ts = Timestamp::new(-1, 0);
    let bytes = encode(&Value::Timestamp(ts));
    assert_eq!(bytes[0], 0xc7); // ext8
    assert_eq!(bytes[1], 12);
    roundtrip(Value::Timestamp(ts));
}

#[test]
fn reserved_tag_0xc1_is_rejected() {
    let err = decode(&[0xc1]).unwrap_err();
    assert_eq!(err, CodecError::ReservedTag);
}

#[test]
fn truncated_input_is_rejected() {
    // uint16 tag with only one of its two length bytes present.
    let err = decode(&[0xcd, 0x01]).unwrap_err();
    assert_eq!(err, CodecError::Truncated);

    let err = decode(&[]).unwrap_err();
    assert_eq!(err, CodecError::Truncated);
}

#[test]
fn non_string_map_key_is_rejected() {
    // fixmap with one entry whose key is the integer 1, not a string.
    let bytes = vec![0x81, 0x01, 0xc0];
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err, CodecError::NonStringMapKey);
}

#[test]
fn unsupported_ext_type_is_rejected() {
    // fixext1 with ext type 5 and one payload byte.
    let bytes = vec![0xd4, 0x05, 0x00];
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err, CodecError::UnsupportedExtType(5));
}

#[test]
fn message_envelope_shape_roundtrips() {
    let envelope = Value::Map(indexmap! {
        "t".to_string() => Value::str("data"),
        "c".to_string() => Value::str("room-1"),
        "pl".to_string() => Value::Binary(encode(&Value::Map(indexmap! {
            "event".to_string() => Value::str("speak"),
            "data".to_string() => Value::str("hello"),
        }))),
    });
    roundtrip(envelope);
}
