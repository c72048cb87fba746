//! `TO2.Done = [NonceTO2ProveDv]` and `TO2.Done2 = [NonceTO2SetupDv]`.

use crate::types::Nonce;
use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    pub nonce_prove_dv: Nonce,
}

impl CborCodec for Done {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![self.nonce_prove_dv.to_value()?]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [nonce] = value::fields(v, "TO2.Done")?;
        Ok(Self {
            nonce_prove_dv: Nonce::from_value(nonce)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done2 {
    pub nonce_setup_dv: Nonce,
}

impl CborCodec for Done2 {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![self.nonce_setup_dv.to_value()?]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [nonce] = value::fields(v, "TO2.Done2")?;
        Ok(Self {
            nonce_setup_dv: Nonce::from_value(nonce)?,
        })
    }
}
