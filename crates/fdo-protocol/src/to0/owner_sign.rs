//! `TO0.OwnerSign = [to0d, to1d]`.
//!
//! `to0d` travels as a byte string so the RV server can hash the exact bytes
//! the owner signed over in `to1d`.

use crate::error::ProtocolResult;
use crate::types::{Nonce, RvTo2Addr, list_from_value, list_to_value};
use crate::voucher::OwnershipVoucher;
use coset::CoseSign1;
use fdo_cbor::value::{self, bstr, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose;
use fdo_crypto::hash::{FdoHash, HashType};
use fdo_crypto::keys::Es256SigningKey;

/// `to0d = [voucher, waitSeconds, NonceTO0Sign]`.
#[derive(Debug, Clone, PartialEq)]
pub struct To0d {
    pub voucher: OwnershipVoucher,
    pub wait_seconds: u32,
    pub nonce_to0_sign: Nonce,
}

impl CborCodec for To0d {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            self.voucher.to_value()?,
            uint(self.wait_seconds.into()),
            self.nonce_to0_sign.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [voucher, wait, nonce] = value::fields(v, "to0d")?;
        Ok(Self {
            voucher: OwnershipVoucher::from_value(voucher)?,
            wait_seconds: value::int(&wait, "to0d.waitSeconds")?,
            nonce_to0_sign: Nonce::from_value(nonce)?,
        })
    }
}

/// `to1d` payload: `[[RVTO2AddrEntry...], to0dHash]`.
#[derive(Debug, Clone, PartialEq)]
pub struct To1dPayload {
    pub addrs: Vec<RvTo2Addr>,
    pub to0d_hash: FdoHash,
}

impl CborCodec for To1dPayload {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            list_to_value(&self.addrs)?,
            self.to0d_hash.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [addrs, hash] = value::fields(v, "to1d")?;
        Ok(Self {
            addrs: list_from_value(addrs, "to1d.rvTo2Addr")?,
            to0d_hash: FdoHash::from_value(hash)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSign {
    pub to0d: Vec<u8>,
    pub to1d: CoseSign1,
}

impl OwnerSign {
    /// Encode `to0d` and sign a `to1d` pointing at `addrs` with the owner key.
    ///
    /// # Errors
    /// Fails if encoding fails.
    pub fn new(
        to0d: &To0d,
        addrs: Vec<RvTo2Addr>,
        owner_key: &Es256SigningKey,
        hash_type: HashType,
    ) -> ProtocolResult<Self> {
        let to0d = to0d.to_bytes()?;
        let payload = To1dPayload {
            addrs,
            to0d_hash: FdoHash::digest(hash_type, &to0d),
        };
        let to1d = cose::sign1(payload.to_bytes()?, owner_key, cose::no_headers());
        Ok(Self { to0d, to1d })
    }

    /// Decode the embedded `to0d`.
    ///
    /// # Errors
    /// Returns [`crate::ProtocolError::Decode`] when malformed.
    pub fn decode_to0d(&self) -> ProtocolResult<To0d> {
        Ok(To0d::from_bytes(&self.to0d)?)
    }

    /// Decode the `to1d` payload without checking its signature.
    ///
    /// # Errors
    /// Returns [`crate::ProtocolError::Decode`] when malformed.
    pub fn decode_to1d(&self) -> ProtocolResult<To1dPayload> {
        Ok(To1dPayload::from_bytes(cose::payload(&self.to1d)?)?)
    }
}

impl CborCodec for OwnerSign {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            bstr(self.to0d.clone()),
            cose::embed_sign1(&self.to1d, "to1d")?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [to0d, to1d] = value::fields(v, "TO0.OwnerSign")?;
        Ok(Self {
            to0d: value::bytes(to0d, "TO0.OwnerSign.to0d")?,
            to1d: cose::extract_sign1(to1d, "to1d")?,
        })
    }
}
