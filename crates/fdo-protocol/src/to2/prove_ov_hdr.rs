//! `TO2.ProveOVHdr`: the owner proves it holds the voucher's final key.
//!
//! Sign1 over `[OVHeader, NumOVEntries, HMac, NonceTO2ProveOV, eBSigInfo,
//! xAKeyExchange, helloDeviceHash, maxOwnerMessageSize]` with `CUPHNonce`
//! (= NonceTO2ProveDv) and `CUPHOwnerPubKey` in the unprotected header.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Nonce, SigInfo};
use coset::CoseSign1;
use fdo_cbor::value::{self, bstr, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose::{self, header_label};
use fdo_crypto::hash::FdoHash;
use fdo_crypto::keys::{Es256SigningKey, FdoPublicKey};

#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdrPayload {
    pub header_bytes: Vec<u8>,
    pub num_entries: u8,
    pub header_hmac: FdoHash,
    pub nonce_prove_ov: Nonce,
    pub eb_sig_info: SigInfo,
    pub xa_key_exchange: Vec<u8>,
    pub hello_device_hash: FdoHash,
    pub max_owner_message_size: u16,
}

impl CborCodec for ProveOvHdrPayload {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            bstr(self.header_bytes.clone()),
            uint(self.num_entries.into()),
            self.header_hmac.to_value()?,
            self.nonce_prove_ov.to_value()?,
            self.eb_sig_info.to_value()?,
            bstr(self.xa_key_exchange.clone()),
            self.hello_device_hash.to_value()?,
            uint(self.max_owner_message_size.into()),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [header, num, hmac, nonce, sig_info, xa, hello_hash, max_size] =
            value::fields(v, "TO2.ProveOVHdr")?;
        Ok(Self {
            header_bytes: value::bytes(header, "TO2.ProveOVHdr.ovHeader")?,
            num_entries: value::int(&num, "TO2.ProveOVHdr.numOVEntries")?,
            header_hmac: FdoHash::from_value(hmac)?,
            nonce_prove_ov: Nonce::from_value(nonce)?,
            eb_sig_info: SigInfo::from_value(sig_info)?,
            xa_key_exchange: value::bytes(xa, "TO2.ProveOVHdr.xAKeyExchange")?,
            hello_device_hash: FdoHash::from_value(hello_hash)?,
            max_owner_message_size: value::int(&max_size, "TO2.ProveOVHdr.maxOwnerMessageSize")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdr(pub CoseSign1);

impl ProveOvHdr {
    /// Sign `payload` with the owner key.
    ///
    /// # Errors
    /// Fails if the payload or owner public key cannot be encoded.
    pub fn sign(
        payload: &ProveOvHdrPayload,
        owner_key: &Es256SigningKey,
        nonce_prove_dv: Nonce,
    ) -> ProtocolResult<Self> {
        let unprotected = cose::unprotected(vec![
            (header_label::CUPH_NONCE, nonce_prove_dv.to_value()?),
            (header_label::CUPH_OWNER_PUBKEY, owner_key.public_key()?.to_value()?),
        ]);
        Ok(Self(cose::sign1(payload.to_bytes()?, owner_key, unprotected)))
    }

    /// # Errors
    /// Returns [`ProtocolError::Decode`] when the payload is malformed.
    pub fn payload(&self) -> ProtocolResult<ProveOvHdrPayload> {
        Ok(ProveOvHdrPayload::from_bytes(cose::payload(&self.0)?)?)
    }

    /// `NonceTO2ProveDv` from the unprotected header.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] when absent or malformed.
    pub fn nonce_prove_dv(&self) -> ProtocolResult<Nonce> {
        let v = cose::unprotected_value(&self.0, header_label::CUPH_NONCE)
            .ok_or_else(|| ProtocolError::Decode("ProveOVHdr: missing CUPHNonce".into()))?;
        Ok(Nonce::from_value(v.clone())?)
    }

    /// Owner public key from the unprotected header.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] when absent or malformed.
    pub fn owner_pub_key(&self) -> ProtocolResult<FdoPublicKey> {
        let v = cose::unprotected_value(&self.0, header_label::CUPH_OWNER_PUBKEY)
            .ok_or_else(|| ProtocolError::Decode("ProveOVHdr: missing CUPHOwnerPubKey".into()))?;
        Ok(FdoPublicKey::from_value(v.clone())?)
    }
}

impl CborCodec for ProveOvHdr {
    fn to_value(&self) -> SerializationResult<Value> {
        cose::embed_sign1(&self.0, "TO2.ProveOVHdr")
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        cose::extract_sign1(v, "TO2.ProveOVHdr").map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_crypto::hash::HashType;

    #[test]
    fn header_values_survive_the_wire() {
        let owner = Es256SigningKey::generate();
        let payload = ProveOvHdrPayload {
            header_bytes: vec![0x80],
            num_entries: 3,
            header_hmac: FdoHash::hmac(HashType::HmacSha256, b"k", b"h").unwrap(),
            nonce_prove_ov: Nonce::random(),
            eb_sig_info: SigInfo::es256(),
            xa_key_exchange: vec![1, 2, 3],
            hello_device_hash: FdoHash::digest(HashType::Sha256, b"hello"),
            max_owner_message_size: 0,
        };
        let nonce = Nonce::random();
        let msg = ProveOvHdr::sign(&payload, &owner, nonce).unwrap();
        let back = ProveOvHdr::from_bytes(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(back.payload().unwrap(), payload);
        assert_eq!(back.nonce_prove_dv().unwrap(), nonce);
        let key = back.owner_pub_key().unwrap().verifying_key().unwrap();
        cose::verify_sign1(&back.0, &key).unwrap();
    }
}
