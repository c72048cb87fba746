//! `TO2.ProveDevice`: EAT signed by the device attestation key.
//!
//! The token carries `NonceTO2ProveDv` and `[xBKeyExchange]` in the FDO claim;
//! `EUPHNonce` (= NonceTO2SetupDv) rides in the unprotected header.

use crate::eat::EatPayload;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Guid, Nonce};
use coset::CoseSign1;
use fdo_cbor::value::{self, bstr};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose::{self, header_label};
use fdo_crypto::keys::Es256SigningKey;

#[derive(Debug, Clone, PartialEq)]
pub struct ProveDevice(pub CoseSign1);

impl ProveDevice {
    /// # Errors
    /// Fails if the token cannot be encoded.
    pub fn sign(
        guid: &Guid,
        nonce_prove_dv: Nonce,
        xb_key_exchange: Vec<u8>,
        nonce_setup_dv: Nonce,
        device_key: &Es256SigningKey,
    ) -> ProtocolResult<Self> {
        let eat = EatPayload::new(guid, nonce_prove_dv).with_fdo(vec![bstr(xb_key_exchange)]);
        let unprotected = cose::unprotected(vec![(
            header_label::EUPH_NONCE,
            nonce_setup_dv.to_value()?,
        )]);
        Ok(Self(cose::sign1(eat.to_bytes()?, device_key, unprotected)))
    }

    /// # Errors
    /// Returns [`ProtocolError::Decode`] when malformed.
    pub fn eat(&self) -> ProtocolResult<EatPayload> {
        Ok(EatPayload::from_bytes(cose::payload(&self.0)?)?)
    }

    /// `xBKeyExchange` from the FDO claim.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] when absent or malformed.
    pub fn xb_key_exchange(&self) -> ProtocolResult<Vec<u8>> {
        let first = self
            .eat()?
            .fdo
            .and_then(|fields| fields.into_iter().next())
            .ok_or_else(|| ProtocolError::Decode("ProveDevice: missing xBKeyExchange".into()))?;
        Ok(value::bytes(first, "ProveDevice.xBKeyExchange")?)
    }

    /// `NonceTO2SetupDv` from the unprotected header.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] when absent or malformed.
    pub fn nonce_setup_dv(&self) -> ProtocolResult<Nonce> {
        let v = cose::unprotected_value(&self.0, header_label::EUPH_NONCE)
            .ok_or_else(|| ProtocolError::Decode("ProveDevice: missing EUPHNonce".into()))?;
        Ok(Nonce::from_value(v.clone())?)
    }
}

impl CborCodec for ProveDevice {
    fn to_value(&self) -> SerializationResult<Value> {
        cose::embed_sign1(&self.0, "TO2.ProveDevice")
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        cose::extract_sign1(v, "TO2.ProveDevice").map(Self)
    }
}
