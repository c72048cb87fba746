//! `TO1.HelloRV = [Guid, eASigInfo]`.

use crate::types::{Guid, SigInfo};
use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRv {
    pub guid: Guid,
    pub ea_sig_info: SigInfo,
}

impl CborCodec for HelloRv {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            self.guid.to_value()?,
            self.ea_sig_info.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [guid, sig_info] = value::fields(v, "TO1.HelloRV")?;
        Ok(Self {
            guid: Guid::from_value(guid)?,
            ea_sig_info: SigInfo::from_value(sig_info)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let msg = HelloRv {
            guid: Guid::random(),
            ea_sig_info: SigInfo::es256(),
        };
        assert_eq!(HelloRv::from_bytes(&msg.to_bytes().unwrap()).unwrap(), msg);
    }
}
