//! Service-info exchange (68/69).

use crate::types::{ServiceInfoKv, list_from_value, list_to_value};
use fdo_cbor::value;
use fdo_cbor::{CborCodec, SerializationResult, Value};

/// `TO2.DeviceServiceInfo = [IsMoreServiceInfo, ServiceInfo]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceServiceInfo {
    pub is_more: bool,
    pub service_info: Vec<ServiceInfoKv>,
}

impl CborCodec for DeviceServiceInfo {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            Value::Bool(self.is_more),
            list_to_value(&self.service_info)?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [is_more, info] = value::fields(v, "TO2.DeviceServiceInfo")?;
        Ok(Self {
            is_more: value::boolean(is_more, "TO2.DeviceServiceInfo.isMore")?,
            service_info: list_from_value(info, "TO2.DeviceServiceInfo.serviceInfo")?,
        })
    }
}

/// `TO2.OwnerServiceInfo = [IsMoreServiceInfo, IsDone, ServiceInfo]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OwnerServiceInfo {
    pub is_more: bool,
    pub is_done: bool,
    pub service_info: Vec<ServiceInfoKv>,
}

impl CborCodec for OwnerServiceInfo {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            Value::Bool(self.is_more),
            Value::Bool(self.is_done),
            list_to_value(&self.service_info)?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [is_more, is_done, info] = value::fields(v, "TO2.OwnerServiceInfo")?;
        Ok(Self {
            is_more: value::boolean(is_more, "TO2.OwnerServiceInfo.isMore")?,
            is_done: value::boolean(is_done, "TO2.OwnerServiceInfo.isDone")?,
            service_info: list_from_value(info, "TO2.OwnerServiceInfo.serviceInfo")?,
        })
    }
}
