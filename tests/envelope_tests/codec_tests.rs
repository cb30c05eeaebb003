//! Tests for the envelope codec
//!
//! These tests verify:
//! - Raw byte types pass through untouched
//! - JSON types decode to exactly what was encoded
//! - Length-prefixed framing rejects malformed input

use std::collections::BTreeMap;
use std::io::Cursor;

use bytes::Bytes;
use logdict::envelope::{Codec, Envelope, Json, LENGTH_PREFIX_SIZE};
use logdict::DictError;
use serde::{Deserialize, Serialize};

// =============================================================================
// Helper Functions
// =============================================================================

fn round_trip<T: Codec>(value: &T) -> T {
    let envelope = value.encode().unwrap();
    T::decode(&envelope).unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    age: u32,
    tags: Vec<String>,
    scores: BTreeMap<String, f64>,
}

// =============================================================================
// Raw Bytes Tests
// =============================================================================

#[test]
fn test_vec_payload_is_the_value() {
    let raw = vec![0u8, 1, 2, 255, 254];
    let envelope = raw.encode().unwrap();

    assert_eq!(envelope.payload().as_ref(), raw.as_slice());
    assert_eq!(envelope.size() as usize, raw.len());
}

#[test]
fn test_empty_bytes() {
    let envelope = Bytes::new().encode().unwrap();
    assert_eq!(envelope.size(), 0);
    assert_eq!(round_trip(&Bytes::new()), Bytes::new());
}

#[test]
fn test_non_utf8_bytes_survive() {
    let raw = Bytes::from_static(&[0xc3, 0x28, 0xa0, 0xa1, 0xff]);
    assert_eq!(round_trip(&raw), raw);
}

// =============================================================================
// JSON Tests
// =============================================================================

#[test]
fn test_string_is_json_text() {
    let envelope = "hello".to_string().encode().unwrap();
    assert_eq!(envelope.payload().as_ref(), b"\"hello\"");
}

#[test]
fn test_unicode_and_escapes() {
    let value = "naïve \"quoted\"\n日本語 🚀".to_string();
    assert_eq!(round_trip(&value), value);
}

#[test]
fn test_integer_extremes() {
    assert_eq!(round_trip(&u64::MAX), u64::MAX);
    assert_eq!(round_trip(&i64::MIN), i64::MIN);
    assert_eq!(round_trip(&0u8), 0u8);
    assert_eq!(round_trip(&-1i32), -1i32);
}

#[test]
fn test_bools_and_chars() {
    assert!(round_trip(&true));
    assert!(!round_trip(&false));
    assert_eq!(round_trip(&'é'), 'é');
}

#[test]
fn test_f64_bit_patterns_round_trip() {
    // xorshift64 over the whole bit space, so subnormals and extreme exponents show up
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let mut checked = 0;
    for _ in 0..200_000 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let value = f64::from_bits(state);
        if !value.is_finite() {
            continue;
        }
        let decoded = round_trip(&value);
        assert_eq!(
            decoded.to_bits(),
            value.to_bits(),
            "{:e} decoded as {:e}",
            value,
            decoded
        );
        checked += 1;
    }
    assert!(checked > 190_000);
}

#[test]
fn test_f64_edge_values_round_trip() {
    for value in [
        0.0f64,
        -0.0,
        0.1,
        1.0715660391465826e-75,
        f64::MIN_POSITIVE,
        f64::MIN_POSITIVE / 3.0,
        f64::from_bits(1),
        f64::MAX,
        f64::MIN,
        f64::EPSILON,
    ] {
        assert_eq!(round_trip(&value).to_bits(), value.to_bits(), "{:e}", value);
    }
}

#[test]
fn test_f32_values_round_trip() {
    for value in [
        0.1f32,
        -2.5,
        f32::MIN_POSITIVE,
        f32::MAX,
        f32::MIN,
        f32::EPSILON,
        16_777_217.0,
    ] {
        assert_eq!(round_trip(&value).to_bits(), value.to_bits(), "{:e}", value);
    }
}

#[test]
fn test_non_finite_floats_are_rejected() {
    for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
        assert!(matches!(value.encode(), Err(DictError::Serialization(_))));
    }
    for value in [f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
        assert!(matches!(value.encode(), Err(DictError::Serialization(_))));
    }
}

#[test]
fn test_struct_through_json_wrapper() {
    let mut scores = BTreeMap::new();
    scores.insert("math".to_string(), 97.5);
    let profile = Json(Profile {
        name: "Ada".to_string(),
        age: 36,
        tags: vec!["admin".to_string(), "ops".to_string()],
        scores,
    });

    assert_eq!(round_trip(&profile), profile);
}

#[test]
fn test_json_wrapper_is_transparent() {
    let wrapped = Json(vec![1u32, 2, 3]).encode().unwrap();
    assert_eq!(wrapped.payload().as_ref(), b"[1,2,3]");
}

#[test]
fn test_equal_keys_encode_identically() {
    let a = Json(("user".to_string(), 42u64)).encode().unwrap();
    let b = Json(("user".to_string(), 42u64)).encode().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_decode_type_mismatch_is_serialization_error() {
    let envelope = "not a number".to_string().encode().unwrap();
    assert!(matches!(
        u64::decode(&envelope),
        Err(DictError::Serialization(_))
    ));
}

#[test]
fn test_decode_invalid_json() {
    let envelope = Envelope::new(b"{broken".to_vec()).unwrap();
    assert!(matches!(
        String::decode(&envelope),
        Err(DictError::Serialization(_))
    ));
}

// =============================================================================
// Framing Tests
// =============================================================================

#[test]
fn test_prefix_is_big_endian() {
    let envelope = Envelope::new(vec![7u8; 258]).unwrap();
    let encoded = envelope.encode();

    assert_eq!(&encoded[..LENGTH_PREFIX_SIZE], &[0, 0, 1, 2]);
    assert_eq!(encoded.len(), LENGTH_PREFIX_SIZE + 258);
}

#[test]
fn test_declared_size_longer_than_payload() {
    let mut encoded = Envelope::new(b"abcd".to_vec()).unwrap().encode();
    encoded[3] = 10;
    assert!(matches!(
        Envelope::decode_exact(&encoded),
        Err(DictError::Envelope(_))
    ));
}

#[test]
fn test_declared_size_shorter_than_payload() {
    let mut encoded = Envelope::new(b"abcd".to_vec()).unwrap().encode();
    encoded[3] = 2;
    assert!(matches!(
        Envelope::decode_exact(&encoded),
        Err(DictError::Envelope(_))
    ));
}

#[test]
fn test_read_from_stream_sequence() {
    let mut buf = Vec::new();
    for word in ["alpha", "", "gamma"] {
        Envelope::new(word.as_bytes().to_vec())
            .unwrap()
            .encode_into(&mut buf);
    }

    let mut reader = Cursor::new(buf);
    let decoded: Vec<_> = (0..3)
        .map(|_| Envelope::read_from(&mut reader).unwrap())
        .collect();

    assert_eq!(decoded[0].payload().as_ref(), b"alpha");
    assert_eq!(decoded[1].size(), 0);
    assert_eq!(decoded[2].payload().as_ref(), b"gamma");
    assert!(Envelope::read_from(&mut reader).is_err());
}
