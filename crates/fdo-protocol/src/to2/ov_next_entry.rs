//! `TO2.OVNextEntry = [OVEntryNum, OVEntry]`.

use coset::CoseSign1;
use fdo_cbor::value::{self, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose;

#[derive(Debug, Clone, PartialEq)]
pub struct OvNextEntry {
    pub entry_num: u8,
    pub entry: CoseSign1,
}

impl CborCodec for OvNextEntry {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            uint(self.entry_num.into()),
            cose::embed_sign1(&self.entry, "TO2.OVNextEntry.entry")?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [num, entry] = value::fields(v, "TO2.OVNextEntry")?;
        Ok(Self {
            entry_num: value::int(&num, "TO2.OVNextEntry.entryNum")?,
            entry: cose::extract_sign1(entry, "TO2.OVNextEntry.entry")?,
        })
    }
}
