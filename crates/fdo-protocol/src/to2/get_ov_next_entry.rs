//! `TO2.GetOVNextEntry = [OVEntryNum]`.

use fdo_cbor::value::{self, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOvNextEntry {
    pub entry_num: u8,
}

impl CborCodec for GetOvNextEntry {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![uint(self.entry_num.into())]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [num] = value::fields(v, "TO2.GetOVNextEntry")?;
        Ok(Self {
            entry_num: value::int(&num, "TO2.GetOVNextEntry.entryNum")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_out_of_u8_range_is_a_decode_error() {
        let v = Value::Array(vec![uint(300)]);
        assert!(GetOvNextEntry::from_value(v).is_err());
    }
}
