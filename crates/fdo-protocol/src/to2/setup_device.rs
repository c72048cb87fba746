//! `TO2.SetupDevice`: owner-signed `[RendezvousInfo, Guid, NonceTO2SetupDv, Owner2Key]`.

use crate::error::ProtocolResult;
use crate::types::{Guid, Nonce, RendezvousInfo};
use coset::CoseSign1;
use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose;
use fdo_crypto::keys::{Es256SigningKey, FdoPublicKey};

#[derive(Debug, Clone, PartialEq)]
pub struct SetupDevicePayload {
    pub rv_info: RendezvousInfo,
    pub replacement_guid: Guid,
    pub nonce_setup_dv: Nonce,
    pub owner2_key: FdoPublicKey,
}

impl CborCodec for SetupDevicePayload {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            self.rv_info.to_value()?,
            self.replacement_guid.to_value()?,
            self.nonce_setup_dv.to_value()?,
            self.owner2_key.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [rv_info, guid, nonce, owner2] = value::fields(v, "TO2.SetupDevice")?;
        Ok(Self {
            rv_info: RendezvousInfo::from_value(rv_info)?,
            replacement_guid: Guid::from_value(guid)?,
            nonce_setup_dv: Nonce::from_value(nonce)?,
            owner2_key: FdoPublicKey::from_value(owner2)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetupDevice(pub CoseSign1);

impl SetupDevice {
    /// # Errors
    /// Fails if the payload cannot be encoded.
    pub fn sign(payload: &SetupDevicePayload, owner_key: &Es256SigningKey) -> ProtocolResult<Self> {
        Ok(Self(cose::sign1(payload.to_bytes()?, owner_key, cose::no_headers())))
    }

    /// # Errors
    /// Returns [`crate::ProtocolError::Decode`] when malformed.
    pub fn payload(&self) -> ProtocolResult<SetupDevicePayload> {
        Ok(SetupDevicePayload::from_bytes(cose::payload(&self.0)?)?)
    }
}

impl CborCodec for SetupDevice {
    fn to_value(&self) -> SerializationResult<Value> {
        cose::embed_sign1(&self.0, "TO2.SetupDevice")
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        cose::extract_sign1(v, "TO2.SetupDevice").map(Self)
    }
}
