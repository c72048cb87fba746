//! CBOR encoding for the FDO conformance workspace.
//!
//! Two kinds of data flow through this crate:
//! - **Wire messages**: positional CBOR arrays built explicitly through
//!   [`CborCodec`] so that field order and types match the FDO 1.01 layout.
//! - **Stored entities**: serde structs persisted as a single deterministic
//!   CBOR blob via [`to_vec`] / [`from_slice`].
//!
//! Decoding always reads exactly one CBOR item and rejects trailing bytes.

#![forbid(unsafe_code)]

pub mod hex_or_bytes;
pub mod hex_or_bytes_vec;
pub mod value;

use ciborium::de::from_reader;
use ciborium::ser::into_writer;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use ciborium::value::{Integer, Value};

/// Upper bound on any single encoded message or stored blob.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Errors that can occur while encoding or decoding CBOR.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The payload exceeds [`MAX_MESSAGE_BYTES`].
    #[error("payload too large ({len} bytes > {max} bytes)")]
    PayloadTooLarge { len: usize, max: usize },

    /// The CBOR payload has trailing bytes after the first decoded value.
    #[error("trailing bytes after CBOR value")]
    TrailingBytes,

    /// A map contains duplicate keys (after canonicalization).
    #[error("duplicate map key (canonical key bytes: {key_hex})")]
    DuplicateMapKey { key_hex: String },

    /// A positional field had the wrong CBOR major type.
    #[error("{what}: expected {expected}")]
    UnexpectedType {
        what: &'static str,
        expected: &'static str,
    },

    /// An array or byte string had the wrong number of elements.
    #[error("{what}: expected length {expected}, got {actual}")]
    WrongLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An integer did not fit the target type.
    #[error("{what}: integer out of range")]
    IntegerOutOfRange { what: &'static str },

    /// A value decoded but carried an unknown discriminant or inconsistent content.
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// The input value cannot be represented as a dynamic CBOR `Value`.
    #[error("cbor value conversion error: {0}")]
    CborValue(#[from] ciborium::value::Error),

    /// CBOR serialization failed.
    #[error("cbor serialization error: {0}")]
    CborSerialize(#[from] ciborium::ser::Error<std::io::Error>),

    /// CBOR deserialization failed.
    #[error("cbor deserialization error: {0}")]
    CborDeserialize(#[from] ciborium::de::Error<std::io::Error>),
}

impl SerializationError {
    /// Shorthand for [`SerializationError::Malformed`].
    #[must_use]
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

/// Result alias for this crate.
pub type SerializationResult<T> = Result<T, SerializationError>;

/// Explicit positional CBOR codec for protocol structures.
///
/// FDO messages are CBOR arrays whose meaning depends on position, so each
/// message type spells out its own layout instead of relying on serde's
/// struct-as-map encoding.
pub trait CborCodec: Sized {
    /// Build the CBOR value for this structure.
    ///
    /// # Errors
    /// Returns an error if an embedded structure cannot be represented.
    fn to_value(&self) -> SerializationResult<Value>;

    /// Parse the structure from a decoded CBOR value.
    ///
    /// # Errors
    /// Returns a [`SerializationError`] when the value does not have the expected shape.
    fn from_value(value: Value) -> SerializationResult<Self>;

    /// Encode to bytes.
    ///
    /// # Errors
    /// Returns an error if CBOR serialization fails.
    fn to_bytes(&self) -> SerializationResult<Vec<u8>> {
        encode_value(&self.to_value()?)
    }

    /// Decode from bytes (exactly one CBOR item).
    ///
    /// # Errors
    /// Returns an error if the bytes are not a single well-formed item of this shape.
    fn from_bytes(bytes: &[u8]) -> SerializationResult<Self> {
        Self::from_value(decode_value(bytes)?)
    }
}

/// Encode a dynamic CBOR value as-is.
///
/// # Errors
/// Returns an error if serialization fails or the output exceeds [`MAX_MESSAGE_BYTES`].
pub fn encode_value(value: &Value) -> SerializationResult<Vec<u8>> {
    let mut out = Vec::new();
    into_writer(value, &mut out)?;
    check_size(out.len())?;
    Ok(out)
}

/// Decode exactly one CBOR item into a dynamic value.
///
/// # Errors
/// Returns an error on malformed CBOR, oversized input or trailing bytes.
pub fn decode_value(bytes: &[u8]) -> SerializationResult<Value> {
    from_slice(bytes)
}

/// Serialize a stored entity to deterministic CBOR bytes.
///
/// Maps are sorted by canonical key bytes (RFC 8949 §4.2.1), so two equal
/// entities always produce identical blobs.
///
/// # Errors
/// Returns `SerializationError` if the value cannot be represented as a CBOR `Value`, if
/// canonicalization fails (e.g., duplicate map keys), or if CBOR serialization fails.
pub fn to_vec<T: Serialize>(value: &T) -> SerializationResult<Vec<u8>> {
    let mut v = Value::serialized(value)?;
    canonicalize_value_in_place(&mut v)?;
    encode_value(&v)
}

/// Deserialize a single CBOR item, rejecting trailing bytes.
///
/// # Errors
/// Returns an error on malformed CBOR, oversized input or trailing bytes.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> SerializationResult<T> {
    check_size(bytes.len())?;
    let mut reader = bytes;
    let value = from_reader(&mut reader)?;
    if !reader.is_empty() {
        return Err(SerializationError::TrailingBytes);
    }
    Ok(value)
}

fn check_size(len: usize) -> SerializationResult<()> {
    if len > MAX_MESSAGE_BYTES {
        return Err(SerializationError::PayloadTooLarge {
            len,
            max: MAX_MESSAGE_BYTES,
        });
    }
    Ok(())
}

fn canonicalize_value_in_place(v: &mut Value) -> SerializationResult<()> {
    match v {
        Value::Array(items) => {
            for item in items {
                canonicalize_value_in_place(item)?;
            }
        }
        Value::Map(entries) => canonicalize_map(entries)?,
        Value::Tag(_, boxed) => canonicalize_value_in_place(boxed)?,
        _ => {}
    }

    Ok(())
}

fn canonicalize_map(entries: &mut Vec<(Value, Value)>) -> SerializationResult<()> {
    use std::cmp::Ordering;

    let mut with_keys = Vec::with_capacity(entries.len());
    for (mut key, mut value) in std::mem::take(entries) {
        canonicalize_value_in_place(&mut key)?;
        canonicalize_value_in_place(&mut value)?;

        let mut key_bytes = Vec::new();
        into_writer(&key, &mut key_bytes)?;

        with_keys.push((key_bytes, key, value));
    }

    with_keys.sort_by(
        |(a_bytes, _, _), (b_bytes, _, _)| match a_bytes.len().cmp(&b_bytes.len()) {
            Ordering::Equal => a_bytes.cmp(b_bytes),
            other => other,
        },
    );

    if let Some(pair) = with_keys.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(SerializationError::DuplicateMapKey {
            key_hex: hex::encode(&pair[1].0),
        });
    }

    *entries = with_keys
        .into_iter()
        .map(|(_, key, value)| (key, value))
        .collect();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
        #[serde(with = "crate::hex_or_bytes_vec")]
        blob: Vec<u8>,
    }

    // ============================================================================
    // Stored entity encoding
    // ============================================================================

    #[test]
    fn same_entity_produces_same_bytes() {
        let a = Record {
            name: "run".into(),
            count: 3,
            blob: vec![1, 2, 3],
        };
        let b = Record {
            name: "run".into(),
            count: 3,
            blob: vec![1, 2, 3],
        };
        assert_eq!(to_vec(&a).unwrap(), to_vec(&b).unwrap());
    }

    #[test]
    fn hash_map_order_does_not_leak_into_bytes() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32u32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32u32).rev() {
            second.insert(format!("k{i}"), i);
        }
        assert_eq!(to_vec(&first).unwrap(), to_vec(&second).unwrap());
    }

    #[test]
    fn entity_roundtrip_keeps_bytes_as_bstr() {
        let record = Record {
            name: "voucher".into(),
            count: 1,
            blob: vec![0xde, 0xad],
        };
        let bytes = to_vec(&record).unwrap();
        let back: Record = from_slice(&bytes).unwrap();
        assert_eq!(back, record);

        let raw = decode_value(&bytes).unwrap();
        let Value::Map(entries) = raw else {
            panic!("expected map");
        };
        let blob = entries
            .into_iter()
            .find(|(k, _)| k == &Value::Text("blob".into()))
            .map(|(_, v)| v);
        assert_eq!(blob, Some(Value::Bytes(vec![0xde, 0xad])));
    }

    // ============================================================================
    // Decoding guards
    // ============================================================================

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode_value(&Value::Integer(7.into())).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode_value(&bytes),
            Err(SerializationError::TrailingBytes)
        ));
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert!(decode_value(&[]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_array() {
        // array(3) with only one element present
        assert!(decode_value(&[0x83, 0x01]).is_err());
    }

    #[test]
    fn decode_rejects_oversized_input() {
        let bytes = vec![0u8; MAX_MESSAGE_BYTES + 1];
        assert!(matches!(
            decode_value(&bytes),
            Err(SerializationError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn duplicate_map_keys_rejected() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Bool(true)),
            (Value::Integer(1.into()), Value::Bool(false)),
        ]);
        assert!(matches!(
            to_vec(&value),
            Err(SerializationError::DuplicateMapKey { .. })
        ));
    }

    #[test]
    fn human_readable_formats_use_hex() {
        let record = Record {
            name: "x".into(),
            count: 0,
            blob: vec![0xab, 0xcd],
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"abcd\""));
    }
}
