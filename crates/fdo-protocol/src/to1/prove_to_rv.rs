//! `TO1.ProveToRV`: the device signs an EAT carrying `NonceTO1Proof`.

use crate::eat::EatPayload;
use crate::error::ProtocolResult;
use crate::types::{Guid, Nonce};
use coset::CoseSign1;
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose;
use fdo_crypto::keys::Es256SigningKey;

#[derive(Debug, Clone, PartialEq)]
pub struct ProveToRv(pub CoseSign1);

impl ProveToRv {
    /// Sign a token for `guid` answering `nonce`.
    ///
    /// # Errors
    /// Fails if the token cannot be encoded.
    pub fn sign(guid: &Guid, nonce: Nonce, device_key: &Es256SigningKey) -> ProtocolResult<Self> {
        let eat = EatPayload::new(guid, nonce);
        Ok(Self(cose::sign1(eat.to_bytes()?, device_key, cose::no_headers())))
    }

    /// Decode the token without checking the signature.
    ///
    /// # Errors
    /// Returns [`crate::ProtocolError::Decode`] when malformed.
    pub fn eat(&self) -> ProtocolResult<EatPayload> {
        Ok(EatPayload::from_bytes(cose::payload(&self.0)?)?)
    }
}

impl CborCodec for ProveToRv {
    fn to_value(&self) -> SerializationResult<Value> {
        cose::embed_sign1(&self.0, "TO1.ProveToRV")
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        cose::extract_sign1(v, "TO1.ProveToRV").map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_token_roundtrip() {
        let key = Es256SigningKey::generate();
        let guid = Guid::random();
        let nonce = Nonce::random();
        let msg = ProveToRv::sign(&guid, nonce, &key).unwrap();
        let back = ProveToRv::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        cose::verify_sign1(&back.0, &key.verifying_key()).unwrap();
        let eat = back.eat().unwrap();
        assert_eq!(eat.nonce, nonce);
        assert_eq!(eat.guid(), Some(guid));
    }
}
