//! Entity Attestation Token payloads used by ProveToRV and ProveDevice.

use crate::types::{GUID_SIZE, Guid, Nonce};
use fdo_cbor::value::{self, bstr, sint};
use fdo_cbor::{CborCodec, SerializationError, SerializationResult, Value};

/// EAT claim key for the nonce.
pub const EAT_NONCE: i64 = 10;
/// EAT claim key for the universal entity id.
pub const EAT_UEID: i64 = 11;
/// FDO claim carrying protocol-specific fields (`[xBKeyExchange]` in ProveDevice).
pub const EAT_FDO: i64 = -257;

/// UEID type byte for a random (GUID based) identifier.
const UEID_TYPE_RAND: u8 = 0x01;

/// `{10: nonce, 11: ueid, ?-257: [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct EatPayload {
    pub nonce: Nonce,
    pub ueid: Vec<u8>,
    pub fdo: Option<Vec<Value>>,
}

impl EatPayload {
    /// Token for `guid` answering `nonce`.
    #[must_use]
    pub fn new(guid: &Guid, nonce: Nonce) -> Self {
        let mut ueid = Vec::with_capacity(GUID_SIZE + 1);
        ueid.push(UEID_TYPE_RAND);
        ueid.extend_from_slice(guid.as_bytes());
        Self {
            nonce,
            ueid,
            fdo: None,
        }
    }

    #[must_use]
    pub fn with_fdo(mut self, fields: Vec<Value>) -> Self {
        self.fdo = Some(fields);
        self
    }

    /// GUID embedded in the UEID, if it has the expected shape.
    #[must_use]
    pub fn guid(&self) -> Option<Guid> {
        match self.ueid.split_first() {
            Some((&UEID_TYPE_RAND, rest)) => <[u8; GUID_SIZE]>::try_from(rest).ok().map(Guid),
            _ => None,
        }
    }
}

impl CborCodec for EatPayload {
    fn to_value(&self) -> SerializationResult<Value> {
        let mut entries = vec![
            (sint(EAT_NONCE), self.nonce.to_value()?),
            (sint(EAT_UEID), bstr(self.ueid.clone())),
        ];
        if let Some(fdo) = &self.fdo {
            entries.push((sint(EAT_FDO), Value::Array(fdo.clone())));
        }
        Ok(Value::Map(entries))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let entries = value::map(v, "EAT")?;
        let claim = |label: i64, what: &'static str| {
            value::map_get(&entries, label)
                .cloned()
                .ok_or_else(|| SerializationError::malformed(what, "missing claim"))
        };
        Ok(Self {
            nonce: Nonce::from_value(claim(EAT_NONCE, "EAT.nonce")?)?,
            ueid: value::bytes(claim(EAT_UEID, "EAT.ueid")?, "EAT.ueid")?,
            fdo: value::map_get(&entries, EAT_FDO)
                .cloned()
                .map(|v| value::array(v, "EAT.fdo"))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ueid_carries_guid() {
        let guid = Guid::random();
        let eat = EatPayload::new(&guid, Nonce::random());
        assert_eq!(eat.ueid.len(), GUID_SIZE + 1);
        assert_eq!(eat.guid(), Some(guid));
    }

    #[test]
    fn fdo_claim_is_optional() {
        let guid = Guid::random();
        let plain = EatPayload::new(&guid, Nonce::random());
        let back = EatPayload::from_bytes(&plain.to_bytes().unwrap()).unwrap();
        assert_eq!(back, plain);
        assert!(back.fdo.is_none());

        let with = plain.with_fdo(vec![bstr(vec![1, 2, 3])]);
        let back = EatPayload::from_bytes(&with.to_bytes().unwrap()).unwrap();
        assert_eq!(back.fdo, Some(vec![bstr(vec![1, 2, 3])]));
    }

    #[test]
    fn missing_nonce_rejected() {
        let v = Value::Map(vec![(sint(EAT_UEID), bstr(vec![1; 17]))]);
        assert!(EatPayload::from_value(v).is_err());
    }
}
