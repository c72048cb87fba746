//! `COSE_Sign1` helpers for FDO signed payloads.
//!
//! FDO signs everything with ES256 and carries protocol nonces and the owner
//! public key in the unprotected header under private labels.

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{Es256SigningKey, verify_es256};
use coset::{
    AsCborValue, CborSerializable, CoseSign1, CoseSign1Builder, Header, HeaderBuilder, Label,
    RegisteredLabelWithPrivate, TaggedCborSerializable, iana,
};
use fdo_cbor::{SerializationError, SerializationResult, Value};
use p256::ecdsa::VerifyingKey;

/// CBOR tag for `COSE_Sign1`.
pub const TAG_COSE_SIGN1: u64 = 18;

/// Unprotected header labels defined by FDO.
pub mod header_label {
    /// `CUPHNonce`: owner-to-device nonce in ProveOVHdr.
    pub const CUPH_NONCE: i64 = 256;
    /// `CUPHOwnerPubKey`: owner key that signed ProveOVHdr.
    pub const CUPH_OWNER_PUBKEY: i64 = 257;
    /// `EUPHNonce`: device-to-owner nonce in ProveDevice.
    pub const EUPH_NONCE: i64 = -259;
}

/// Empty unprotected header.
#[must_use]
pub fn no_headers() -> Header {
    Header::default()
}

/// Unprotected header with the given private-label entries.
#[must_use]
pub fn unprotected(entries: Vec<(i64, Value)>) -> Header {
    entries
        .into_iter()
        .fold(HeaderBuilder::new(), |b, (label, value)| b.value(label, value))
        .build()
}

/// Sign `payload` with ES256.
#[must_use]
pub fn sign1(payload: Vec<u8>, key: &Es256SigningKey, unprotected: Header) -> CoseSign1 {
    let protected = HeaderBuilder::new()
        .algorithm(iana::Algorithm::ES256)
        .build();

    let mut sign1 = CoseSign1Builder::new()
        .protected(protected)
        .unprotected(unprotected)
        .payload(payload)
        .build();

    let tbs = sign1.tbs_data(&[]);
    sign1.signature = key.sign(&tbs).to_vec();
    sign1
}

/// Verify an ES256 `COSE_Sign1` against `key`.
///
/// # Errors
/// Returns [`CryptoError::Unsupported`] for other algorithms and
/// [`CryptoError::SignatureVerificationFailed`] when the signature is wrong.
pub fn verify_sign1(sign1: &CoseSign1, key: &VerifyingKey) -> CryptoResult<()> {
    match &sign1.protected.header.alg {
        Some(RegisteredLabelWithPrivate::Assigned(iana::Algorithm::ES256)) => {}
        Some(other) => return Err(CryptoError::unsupported("signature algorithm", format!("{other:?}"))),
        None => return Err(CryptoError::CoseFailed("protected header has no alg".into())),
    }
    let tbs = sign1.tbs_data(&[]);
    verify_es256(key, &tbs, &sign1.signature)
}

/// The signed payload bytes.
///
/// # Errors
/// Fails for detached payloads.
pub fn payload(sign1: &CoseSign1) -> CryptoResult<&[u8]> {
    sign1
        .payload
        .as_deref()
        .ok_or_else(|| CryptoError::CoseFailed("detached payload".into()))
}

/// Look up a private unprotected header entry.
#[must_use]
pub fn unprotected_value(sign1: &CoseSign1, label: i64) -> Option<&Value> {
    sign1
        .unprotected
        .rest
        .iter()
        .find_map(|(l, v)| (*l == Label::Int(label)).then_some(v))
}

/// Encode as tagged `COSE_Sign1` bytes.
///
/// # Errors
/// Returns an error if the structure cannot be serialized.
pub fn sign1_to_vec(sign1: &CoseSign1) -> CryptoResult<Vec<u8>> {
    sign1
        .clone()
        .to_tagged_vec()
        .map_err(|e| CryptoError::CoseFailed(e.to_string()))
}

/// Decode tagged or untagged `COSE_Sign1` bytes.
///
/// # Errors
/// Returns an error if the bytes are not a `COSE_Sign1`.
pub fn sign1_from_slice(bytes: &[u8]) -> CryptoResult<CoseSign1> {
    // 0xd2 = tag(18)
    let parsed = if bytes.first() == Some(&0xd2) {
        CoseSign1::from_tagged_slice(bytes)
    } else {
        CoseSign1::from_slice(bytes)
    };
    parsed.map_err(|e| CryptoError::CoseFailed(e.to_string()))
}

/// Embed as a tagged CBOR value inside a larger message.
///
/// # Errors
/// Returns an error if the structure cannot be converted.
pub fn sign1_to_value(sign1: &CoseSign1) -> CryptoResult<Value> {
    let inner = sign1
        .clone()
        .to_cbor_value()
        .map_err(|e| CryptoError::CoseFailed(e.to_string()))?;
    Ok(Value::Tag(TAG_COSE_SIGN1, Box::new(inner)))
}

/// Extract a `COSE_Sign1` embedded in a larger message (tag optional).
///
/// # Errors
/// Returns an error if the value is not a `COSE_Sign1`.
pub fn sign1_from_value(value: Value) -> CryptoResult<CoseSign1> {
    let inner = match value {
        Value::Tag(TAG_COSE_SIGN1, inner) => *inner,
        Value::Tag(other, _) => {
            return Err(CryptoError::CoseFailed(format!(
                "unexpected tag {other} for COSE_Sign1"
            )));
        }
        other => other,
    };
    CoseSign1::from_cbor_value(inner).map_err(|e| CryptoError::CoseFailed(e.to_string()))
}

/// [`sign1_to_value`] for use inside a [`fdo_cbor::CborCodec`] impl.
///
/// # Errors
/// Returns a serialization error naming `what`.
pub fn embed_sign1(sign1: &CoseSign1, what: &'static str) -> SerializationResult<Value> {
    sign1_to_value(sign1).map_err(|e| SerializationError::malformed(what, e.to_string()))
}

/// [`sign1_from_value`] for use inside a [`fdo_cbor::CborCodec`] impl.
///
/// # Errors
/// Returns a serialization error naming `what`.
pub fn extract_sign1(value: Value, what: &'static str) -> SerializationResult<CoseSign1> {
    sign1_from_value(value).map_err(|e| SerializationError::malformed(what, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_cbor::value::bstr;

    #[test]
    fn signed_object_verifies_and_carries_headers() {
        let sk = Es256SigningKey::generate();
        let nonce = vec![7u8; 16];
        let s = sign1(
            b"body".to_vec(),
            &sk,
            unprotected(vec![(header_label::CUPH_NONCE, bstr(nonce.clone()))]),
        );
        verify_sign1(&s, &sk.verifying_key()).unwrap();
        assert_eq!(payload(&s).unwrap(), b"body");
        assert_eq!(
            unprotected_value(&s, header_label::CUPH_NONCE),
            Some(&bstr(nonce))
        );
        assert_eq!(unprotected_value(&s, header_label::EUPH_NONCE), None);
    }

    #[test]
    fn wrong_key_fails() {
        let sk = Es256SigningKey::generate();
        let other = Es256SigningKey::generate();
        let s = sign1(b"body".to_vec(), &sk, no_headers());
        assert!(matches!(
            verify_sign1(&s, &other.verifying_key()),
            Err(CryptoError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn tampered_payload_fails() {
        let sk = Es256SigningKey::generate();
        let mut s = sign1(b"body".to_vec(), &sk, no_headers());
        s.payload = Some(b"bodz".to_vec());
        assert!(verify_sign1(&s, &sk.verifying_key()).is_err());
    }

    #[test]
    fn byte_and_value_forms_are_interchangeable() {
        let sk = Es256SigningKey::generate();
        let s = sign1(b"body".to_vec(), &sk, no_headers());

        let bytes = sign1_to_vec(&s).unwrap();
        assert_eq!(bytes[0], 0xd2);
        let decoded = sign1_from_slice(&bytes).unwrap();
        verify_sign1(&decoded, &sk.verifying_key()).unwrap();

        let v = sign1_to_value(&s).unwrap();
        let from_value = sign1_from_value(v).unwrap();
        verify_sign1(&from_value, &sk.verifying_key()).unwrap();

        let untagged = s.clone().to_vec().unwrap();
        assert!(sign1_from_slice(&untagged).is_ok());
    }

    #[test]
    fn garbage_is_not_a_sign1() {
        assert!(sign1_from_slice(&[0x01, 0x02]).is_err());
        assert!(sign1_from_value(Value::Tag(16, Box::new(Value::Null))).is_err());
    }
}
