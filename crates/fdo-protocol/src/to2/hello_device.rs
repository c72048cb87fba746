//! `TO2.HelloDevice = [maxDeviceMessageSize, Guid, NonceTO2ProveOV, kexSuiteName, cipherSuiteName, eASigInfo]`.

use crate::error::ProtocolResult;
use crate::types::{Guid, Nonce, SigInfo};
use fdo_cbor::value::{self, sint, tstr, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::envelope::CipherSuite;
use fdo_crypto::kex::KexSuite;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloDevice {
    pub max_device_message_size: u16,
    pub guid: Guid,
    pub nonce_prove_ov: Nonce,
    /// Kept as text so unknown suite names survive decoding.
    pub kex_suite_name: String,
    pub cipher_suite: i64,
    pub ea_sig_info: SigInfo,
}

impl HelloDevice {
    #[must_use]
    pub fn new(guid: Guid, kex: KexSuite, cipher: CipherSuite, ea_sig_info: SigInfo) -> Self {
        Self {
            max_device_message_size: 0,
            guid,
            nonce_prove_ov: Nonce::random(),
            kex_suite_name: kex.name().to_owned(),
            cipher_suite: cipher.code(),
            ea_sig_info,
        }
    }

    /// # Errors
    /// Returns [`crate::ProtocolError::Unsupported`] for unknown names.
    pub fn kex_suite(&self) -> ProtocolResult<KexSuite> {
        Ok(self.kex_suite_name.parse()?)
    }

    /// # Errors
    /// Returns [`crate::ProtocolError::Unsupported`] for unknown codes.
    pub fn cipher(&self) -> ProtocolResult<CipherSuite> {
        Ok(CipherSuite::from_code(self.cipher_suite)?)
    }
}

impl CborCodec for HelloDevice {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            uint(self.max_device_message_size.into()),
            self.guid.to_value()?,
            self.nonce_prove_ov.to_value()?,
            tstr(self.kex_suite_name.clone()),
            sint(self.cipher_suite),
            self.ea_sig_info.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [max_size, guid, nonce, kex, cipher, sig_info] = value::fields(v, "TO2.HelloDevice")?;
        Ok(Self {
            max_device_message_size: value::int(&max_size, "TO2.HelloDevice.maxDeviceMessageSize")?,
            guid: Guid::from_value(guid)?,
            nonce_prove_ov: Nonce::from_value(nonce)?,
            kex_suite_name: value::text(kex, "TO2.HelloDevice.kexSuiteName")?,
            cipher_suite: value::int(&cipher, "TO2.HelloDevice.cipherSuiteName")?,
            ea_sig_info: SigInfo::from_value(sig_info)?,
        })
    }
}
