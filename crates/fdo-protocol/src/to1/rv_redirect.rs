//! `TO1.RVRedirect`: the `to1d` the owner registered in TO0.

use crate::error::ProtocolResult;
use crate::to0::To1dPayload;
use coset::CoseSign1;
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose;

#[derive(Debug, Clone, PartialEq)]
pub struct RvRedirect(pub CoseSign1);

impl RvRedirect {
    /// Decode the owner addresses without checking the signature.
    ///
    /// # Errors
    /// Returns [`crate::ProtocolError::Decode`] when malformed.
    pub fn to1d(&self) -> ProtocolResult<To1dPayload> {
        Ok(To1dPayload::from_bytes(cose::payload(&self.0)?)?)
    }
}

impl CborCodec for RvRedirect {
    fn to_value(&self) -> SerializationResult<Value> {
        cose::embed_sign1(&self.0, "TO1.RVRedirect")
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        cose::extract_sign1(v, "TO1.RVRedirect").map(Self)
    }
}
