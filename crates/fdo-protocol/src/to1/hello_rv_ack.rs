//! `TO1.HelloRVAck = [NonceTO1Proof, eBSigInfo]`.

use crate::types::{Nonce, SigInfo};
use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRvAck {
    pub nonce_to1_proof: Nonce,
    pub eb_sig_info: SigInfo,
}

impl CborCodec for HelloRvAck {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            self.nonce_to1_proof.to_value()?,
            self.eb_sig_info.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [nonce, sig_info] = value::fields(v, "TO1.HelloRVAck")?;
        Ok(Self {
            nonce_to1_proof: Nonce::from_value(nonce)?,
            eb_sig_info: SigInfo::from_value(sig_info)?,
        })
    }
}
