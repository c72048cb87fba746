//! The mandatory `devmod` service-info module.

use crate::types::ServiceInfoKv;
use fdo_cbor::Value;
use fdo_cbor::value::{tstr, uint};

pub const MODULE: &str = "devmod";

/// Keys every device must send before the owner sends its own items.
pub const MANDATORY_KEYS: [&str; 9] = [
    "devmod:active",
    "devmod:os",
    "devmod:arch",
    "devmod:version",
    "devmod:device",
    "devmod:sep",
    "devmod:bin",
    "devmod:nummodules",
    "devmod:modules",
];

/// Values a virtual device reports.
#[derive(Debug, Clone)]
pub struct DevmodInfo {
    pub os: String,
    pub arch: String,
    pub version: String,
    pub device: String,
}

impl Default for DevmodInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            device: "FIDO Device Onboard Virtual Device".to_owned(),
        }
    }
}

impl DevmodInfo {
    /// The mandatory items, in [`MANDATORY_KEYS`] order.
    #[must_use]
    pub fn service_info(&self) -> Vec<ServiceInfoKv> {
        vec![
            ServiceInfoKv::new("devmod:active", Value::Bool(true)),
            ServiceInfoKv::new("devmod:os", tstr(self.os.clone())),
            ServiceInfoKv::new("devmod:arch", tstr(self.arch.clone())),
            ServiceInfoKv::new("devmod:version", tstr(self.version.clone())),
            ServiceInfoKv::new("devmod:device", tstr(self.device.clone())),
            ServiceInfoKv::new("devmod:sep", tstr(";")),
            ServiceInfoKv::new("devmod:bin", tstr(self.arch.clone())),
            ServiceInfoKv::new("devmod:nummodules", uint(1)),
            ServiceInfoKv::new(
                "devmod:modules",
                Value::Array(vec![uint(0), uint(1), tstr(MODULE)]),
            ),
        ]
    }
}

/// Mandatory keys not present in `received`.
#[must_use]
pub fn missing_mandatory(received: &[ServiceInfoKv]) -> Vec<&'static str> {
    MANDATORY_KEYS
        .into_iter()
        .filter(|key| !received.iter().any(|kv| kv.key == *key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_sends_every_mandatory_key() {
        let items = DevmodInfo::default().service_info();
        assert!(missing_mandatory(&items).is_empty());
        assert!(items.iter().all(|kv| kv.module() == MODULE));
    }

    #[test]
    fn missing_keys_reported() {
        let items = DevmodInfo::default().service_info();
        let partial: Vec<_> = items.into_iter().filter(|kv| kv.key != "devmod:os").collect();
        assert_eq!(missing_mandatory(&partial), vec!["devmod:os"]);
    }
}
