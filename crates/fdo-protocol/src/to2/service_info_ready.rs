//! Service-info size negotiation (66/67).

use fdo_cbor::value::{self, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::hash::FdoHash;

fn optional_size(v: Value, what: &'static str) -> SerializationResult<Option<u16>> {
    value::optional(v).map(|v| value::int(&v, what)).transpose()
}

fn size_value(size: Option<u16>) -> Value {
    size.map_or(Value::Null, |s| uint(s.into()))
}

/// `TO2.DeviceServiceInfoReady = [ReplacementHMac / null, maxOwnerServiceInfoSz / null]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceServiceInfoReady {
    pub replacement_hmac: Option<FdoHash>,
    pub max_owner_service_info_size: Option<u16>,
}

impl CborCodec for DeviceServiceInfoReady {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            match &self.replacement_hmac {
                Some(h) => h.to_value()?,
                None => Value::Null,
            },
            size_value(self.max_owner_service_info_size),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [hmac, size] = value::fields(v, "TO2.DeviceServiceInfoReady")?;
        Ok(Self {
            replacement_hmac: value::optional(hmac).map(FdoHash::from_value).transpose()?,
            max_owner_service_info_size: optional_size(
                size,
                "TO2.DeviceServiceInfoReady.maxOwnerServiceInfoSz",
            )?,
        })
    }
}

/// `TO2.OwnerServiceInfoReady = [maxDeviceServiceInfoSz / null]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnerServiceInfoReady {
    pub max_device_service_info_size: Option<u16>,
}

impl CborCodec for OwnerServiceInfoReady {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![size_value(self.max_device_service_info_size)]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [size] = value::fields(v, "TO2.OwnerServiceInfoReady")?;
        Ok(Self {
            max_device_service_info_size: optional_size(
                size,
                "TO2.OwnerServiceInfoReady.maxDeviceServiceInfoSz",
            )?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use fdo_crypto::hash::HashType;

    #[test]
    fn nulls_roundtrip() {
        let empty = DeviceServiceInfoReady::default();
        assert_eq!(
            empty.to_value().unwrap(),
            Value::Array(vec![Value::Null, Value::Null])
        );
        assert_eq!(DeviceServiceInfoReady::from_bytes(&empty.to_bytes().unwrap()).unwrap(), empty);

        let full = DeviceServiceInfoReady {
            replacement_hmac: Some(FdoHash::hmac(HashType::HmacSha256, b"k", b"h").unwrap()),
            max_owner_service_info_size: Some(1300),
        };
        assert_eq!(DeviceServiceInfoReady::from_bytes(&full.to_bytes().unwrap()).unwrap(), full);
    }
}
