//! `TO0.HelloAck = [NonceTO0Sign]`.

use crate::types::Nonce;
use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck {
    pub nonce_to0_sign: Nonce,
}

impl CborCodec for HelloAck {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![self.nonce_to0_sign.to_value()?]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [nonce] = value::fields(v, "TO0.HelloAck")?;
        Ok(Self {
            nonce_to0_sign: Nonce::from_value(nonce)?,
        })
    }
}
