//! Serde adapter for fixed-size byte arrays (GUIDs, nonces).
//!
//! Stored entities go to CBOR, where these must be a byte string; the JSON
//! and TOML views (reports, config) get lowercase hex instead.

use serde::de::{Error as _, Expected, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serializer};
use std::fmt;

/// Serialize a fixed-size byte array.
///
/// # Errors
/// Propagates serializer errors.
pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    write_bytes(bytes, serializer)
}

/// Deserialize a fixed-size byte array, enforcing the length.
///
/// # Errors
/// Fails on bad hex, a length other than `N`, or an error from the underlying format.
pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    let raw = read_bytes(deserializer)?;
    <[u8; N]>::try_from(raw.as_slice()).map_err(|_| D::Error::invalid_length(raw.len(), &Len::<N>))
}

struct Len<const N: usize>;

impl<const N: usize> Expected for Len<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{N} bytes")
    }
}

pub(crate) fn write_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(bytes))
    } else {
        serializer.serialize_bytes(bytes)
    }
}

pub(crate) fn read_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    if deserializer.is_human_readable() {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(D::Error::custom)
    } else {
        deserializer.deserialize_bytes(ByteStringVisitor)
    }
}

/// Accepts a CBOR byte string, or an array of small integers from formats
/// without a native bytes type.
pub(crate) struct ByteStringVisitor;

impl<'de> Visitor<'de> for ByteStringVisitor {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte string")
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(v.to_vec())
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            out.push(b);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Guid(#[serde(with = "crate::hex_or_bytes")] [u8; 16]);

    #[test]
    fn cbor_uses_byte_string() {
        let guid = Guid([7u8; 16]);
        let bytes = crate::to_vec(&guid).unwrap();
        // bstr(16) header
        assert_eq!(bytes[0], 0x50);
        let back: Guid = crate::from_slice(&bytes).unwrap();
        assert_eq!(back, guid);
    }

    #[test]
    fn json_uses_hex() {
        let guid = Guid([0xab; 16]);
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
        let back: Guid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, guid);
    }

    #[test]
    fn wrong_length_rejected() {
        let short = crate::encode_value(&crate::Value::Bytes(vec![1; 15])).unwrap();
        assert!(crate::from_slice::<Guid>(&short).is_err());
        assert!(serde_json::from_str::<Guid>("\"abcd\"").is_err());
    }
}
