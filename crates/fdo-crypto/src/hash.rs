//! Digests and HMACs carried on the wire as `[hashType, bytes]`.

use crate::error::{CryptoError, CryptoResult};
use fdo_cbor::value::{self, bstr, sint};
use fdo_cbor::{CborCodec, SerializationError, SerializationResult, Value};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use subtle::ConstantTimeEq;

/// FDO hash algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashType {
    Sha256,
    Sha384,
    HmacSha256,
    HmacSha384,
}

impl HashType {
    /// All known hash types.
    pub const ALL: [Self; 4] = [Self::Sha256, Self::Sha384, Self::HmacSha256, Self::HmacSha384];

    /// Wire identifier.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Sha256 => -16,
            Self::Sha384 => -43,
            Self::HmacSha256 => 5,
            Self::HmacSha384 => 6,
        }
    }

    /// Parse a wire identifier.
    ///
    /// # Errors
    /// Returns [`CryptoError::Unsupported`] for unknown identifiers.
    pub fn from_code(code: i64) -> CryptoResult<Self> {
        match code {
            -16 => Ok(Self::Sha256),
            -43 => Ok(Self::Sha384),
            5 => Ok(Self::HmacSha256),
            6 => Ok(Self::HmacSha384),
            other => Err(CryptoError::unsupported("hash type", other)),
        }
    }

    #[must_use]
    pub const fn is_hmac(self) -> bool {
        matches!(self, Self::HmacSha256 | Self::HmacSha384)
    }

    /// Output length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 | Self::HmacSha256 => 32,
            Self::Sha384 | Self::HmacSha384 => 48,
        }
    }

    /// The HMAC type with the same digest function.
    #[must_use]
    pub const fn to_hmac(self) -> Self {
        match self {
            Self::Sha256 | Self::HmacSha256 => Self::HmacSha256,
            Self::Sha384 | Self::HmacSha384 => Self::HmacSha384,
        }
    }

    /// The plain digest type with the same digest function.
    #[must_use]
    pub const fn to_digest(self) -> Self {
        match self {
            Self::Sha256 | Self::HmacSha256 => Self::Sha256,
            Self::Sha384 | Self::HmacSha384 => Self::Sha384,
        }
    }

    /// Same kind (digest or HMAC), other width.
    #[must_use]
    pub const fn swapped_width(self) -> Self {
        match self {
            Self::Sha256 => Self::Sha384,
            Self::Sha384 => Self::Sha256,
            Self::HmacSha256 => Self::HmacSha384,
            Self::HmacSha384 => Self::HmacSha256,
        }
    }
}

impl std::fmt::Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A tagged digest or HMAC value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdoHash {
    pub hash_type: HashType,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub value: Vec<u8>,
}

impl FdoHash {
    /// Digest `data` with a plain hash type (HMAC types fall back to their digest).
    #[must_use]
    pub fn digest(hash_type: HashType, data: &[u8]) -> Self {
        let hash_type = hash_type.to_digest();
        let value = match hash_type {
            HashType::Sha384 => Sha384::digest(data).to_vec(),
            _ => Sha256::digest(data).to_vec(),
        };
        Self { hash_type, value }
    }

    /// HMAC `data` under `key` (plain types map to their HMAC counterpart).
    ///
    /// # Errors
    /// Returns an error if the key is rejected by the MAC implementation.
    pub fn hmac(hash_type: HashType, key: &[u8], data: &[u8]) -> CryptoResult<Self> {
        let hash_type = hash_type.to_hmac();
        let value = match hash_type {
            HashType::HmacSha384 => hmac_sha384(key, data)?,
            _ => hmac_sha256(key, data)?,
        };
        Ok(Self { hash_type, value })
    }

    /// Check that this digest matches `data`.
    ///
    /// # Errors
    /// Returns [`CryptoError::DigestMismatch`] on mismatch, or an error for HMAC types.
    pub fn verify_digest(&self, data: &[u8]) -> CryptoResult<()> {
        if self.hash_type.is_hmac() {
            return Err(CryptoError::unsupported("digest type", self.hash_type));
        }
        let expected = Self::digest(self.hash_type, data);
        ct_compare(&expected.value, &self.value, "hash")
    }

    /// Check that this HMAC matches `data` under `key`.
    ///
    /// # Errors
    /// Returns [`CryptoError::DigestMismatch`] on mismatch, or an error for digest types.
    pub fn verify_hmac(&self, key: &[u8], data: &[u8]) -> CryptoResult<()> {
        if !self.hash_type.is_hmac() {
            return Err(CryptoError::unsupported("hmac type", self.hash_type));
        }
        let expected = Self::hmac(self.hash_type, key, data)?;
        ct_compare(&expected.value, &self.value, "hmac")
    }
}

impl std::fmt::Debug for FdoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FdoHash({}, {})", self.hash_type, hex_prefix(&self.value))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    let shown: String = bytes.iter().take(8).map(|b| format!("{b:02x}")).collect();
    if bytes.len() > 8 {
        format!("{shown}..")
    } else {
        shown
    }
}

fn ct_compare(expected: &[u8], actual: &[u8], what: &'static str) -> CryptoResult<()> {
    if expected.ct_eq(actual).into() {
        Ok(())
    } else {
        Err(CryptoError::DigestMismatch { what })
    }
}

impl CborCodec for FdoHash {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            sint(self.hash_type.code()),
            bstr(self.value.clone()),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [kind, bytes] = value::fields(v, "Hash")?;
        let code: i64 = value::int(&kind, "Hash.hashType")?;
        let hash_type = HashType::from_code(code)
            .map_err(|e| SerializationError::malformed("Hash.hashType", e.to_string()))?;
        Ok(Self {
            hash_type,
            value: value::bytes(bytes, "Hash.hash")?,
        })
    }
}

/// Raw HMAC-SHA256.
///
/// # Errors
/// Returns an error if the key is rejected.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: 32, actual: key.len() })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Raw HMAC-SHA384.
///
/// # Errors
/// Returns an error if the key is rejected.
pub fn hmac_sha384(key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: 48, actual: key.len() })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let h = FdoHash::digest(HashType::Sha256, b"abc");
        assert_eq!(
            hex::encode(&h.value),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        h.verify_digest(b"abc").unwrap();
        assert!(h.verify_digest(b"abd").is_err());
    }

    #[test]
    fn hmac_types_are_not_digests() {
        let h = FdoHash::hmac(HashType::HmacSha256, b"secret", b"header").unwrap();
        assert!(h.verify_digest(b"header").is_err());
        h.verify_hmac(b"secret", b"header").unwrap();
        assert!(matches!(
            h.verify_hmac(b"other", b"header"),
            Err(CryptoError::DigestMismatch { what: "hmac" })
        ));
    }

    #[test]
    fn widths_follow_type() {
        assert_eq!(FdoHash::digest(HashType::Sha384, b"x").value.len(), 48);
        assert_eq!(
            FdoHash::hmac(HashType::Sha384, b"k", b"x").unwrap().hash_type,
            HashType::HmacSha384
        );
    }

    #[test]
    fn wire_form_is_type_then_bytes() {
        let h = FdoHash::digest(HashType::Sha256, b"");
        let v = h.to_value().unwrap();
        let Value::Array(items) = &v else {
            panic!("hash must be an array");
        };
        assert_eq!(items[0], sint(-16));
        assert_eq!(FdoHash::from_value(v).unwrap(), h);
    }

    #[test]
    fn unknown_hash_type_rejected() {
        let v = Value::Array(vec![sint(99), bstr(vec![0; 32])]);
        assert!(FdoHash::from_value(v).is_err());
    }
}
