//! `TO0.Hello = []`.

use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hello;

impl CborCodec for Hello {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(Vec::new()))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        value::array_of_len(v, 0, "TO0.Hello")?;
        Ok(Self)
    }
}
