//! `TO0.AcceptOwner = [waitSeconds]`.

use fdo_cbor::value::{self, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptOwner {
    pub wait_seconds: u32,
}

impl CborCodec for AcceptOwner {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![uint(self.wait_seconds.into())]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [wait] = value::fields(v, "TO0.AcceptOwner")?;
        Ok(Self {
            wait_seconds: value::int(&wait, "TO0.AcceptOwner.waitSeconds")?,
        })
    }
}
