//! Core FDO types shared by all three sub-protocols.

use crate::error::{ProtocolError, ProtocolResult};
use fdo_cbor::value::{self, bstr, sint, tstr, uint};
use fdo_cbor::{CborCodec, SerializationError, SerializationResult, Value};
use fdo_crypto::keys::SG_TYPE_ES256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use url::Url;

/// Size of GUIDs and nonces in bytes.
pub const GUID_SIZE: usize = 16;

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "fdo_cbor::hex_or_bytes")] pub [u8; GUID_SIZE]);

        impl $name {
            /// Fresh random value.
            #[must_use]
            pub fn random() -> Self {
                Self(fdo_crypto::random_bytes())
            }

            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; GUID_SIZE] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = hex::decode(s).map_err(|e| ProtocolError::Decode(e.to_string()))?;
                <[u8; GUID_SIZE]>::try_from(raw.as_slice())
                    .map(Self)
                    .map_err(|_| ProtocolError::Decode(format!("{} must be {GUID_SIZE} bytes", $what)))
            }
        }

        impl CborCodec for $name {
            fn to_value(&self) -> SerializationResult<Value> {
                Ok(bstr(self.0.to_vec()))
            }

            fn from_value(v: Value) -> SerializationResult<Self> {
                value::bytes_fixed(v, $what).map(Self)
            }
        }
    };
}

byte_id!(
    /// Device GUID, the lookup key for vouchers and registrations.
    Guid,
    "Guid"
);

byte_id!(
    /// Protocol nonce.
    Nonce,
    "Nonce"
);

/// `SigInfo = [sgType, info]` as exchanged in HelloRV and HelloDevice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigInfo {
    pub sg_type: i64,
    pub info: Vec<u8>,
}

impl SigInfo {
    /// ES256 with an empty info field.
    #[must_use]
    pub const fn es256() -> Self {
        Self {
            sg_type: SG_TYPE_ES256,
            info: Vec::new(),
        }
    }

    /// Whether this tool can produce and check signatures of this kind.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.sg_type == SG_TYPE_ES256 && self.info.is_empty()
    }
}

impl CborCodec for SigInfo {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![sint(self.sg_type), bstr(self.info.clone())]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [sg_type, info] = value::fields(v, "SigInfo")?;
        Ok(Self {
            sg_type: value::int(&sg_type, "SigInfo.sgType")?,
            info: value::bytes(info, "SigInfo.info")?,
        })
    }
}

/// Rendezvous instruction variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RvVariable {
    DevOnly,
    OwnerOnly,
    IpAddress,
    DevPort,
    OwnerPort,
    Dns,
    SvCertHash,
    ClCertHash,
    UserInput,
    WifiSsid,
    WifiPw,
    Medium,
    Protocol,
    DelaySec,
    Bypass,
    ExtRv,
}

impl RvVariable {
    const ALL: [Self; 16] = [
        Self::DevOnly,
        Self::OwnerOnly,
        Self::IpAddress,
        Self::DevPort,
        Self::OwnerPort,
        Self::Dns,
        Self::SvCertHash,
        Self::ClCertHash,
        Self::UserInput,
        Self::WifiSsid,
        Self::WifiPw,
        Self::Medium,
        Self::Protocol,
        Self::DelaySec,
        Self::Bypass,
        Self::ExtRv,
    ];

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

/// Value of the `Protocol` rendezvous variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RvProtocolValue {
    Rest = 0,
    Http = 1,
    Https = 2,
    Tcp = 3,
    Tls = 4,
    CoapTcp = 5,
    CoapUdp = 6,
}

/// One `[variable, cbor(value)]` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RendezvousInstr {
    pub variable: RvVariable,
    /// CBOR-encoded value; absent for flag variables such as `DevOnly`.
    pub value: Option<Vec<u8>>,
}

impl RendezvousInstr {
    /// Instruction carrying a CBOR-encoded value.
    ///
    /// # Errors
    /// Fails if the value cannot be encoded.
    pub fn with_value(variable: RvVariable, v: &Value) -> SerializationResult<Self> {
        Ok(Self {
            variable,
            value: Some(fdo_cbor::encode_value(v)?),
        })
    }

    /// Decode the carried value.
    ///
    /// # Errors
    /// Fails if the value bytes are not one CBOR item.
    pub fn decoded_value(&self) -> SerializationResult<Option<Value>> {
        self.value.as_deref().map(fdo_cbor::decode_value).transpose()
    }
}

impl CborCodec for RendezvousInstr {
    fn to_value(&self) -> SerializationResult<Value> {
        let mut items = vec![uint(self.variable.code().into())];
        if let Some(v) = &self.value {
            items.push(bstr(v.clone()));
        }
        Ok(Value::Array(items))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let mut items = value::array(v, "RendezvousInstr")?.into_iter();
        let code: u8 = match items.next() {
            Some(code) => value::int(&code, "RendezvousInstr.variable")?,
            None => return Err(SerializationError::malformed("RendezvousInstr", "empty")),
        };
        let variable = RvVariable::from_code(code).ok_or_else(|| {
            SerializationError::malformed("RendezvousInstr.variable", format!("unknown {code}"))
        })?;
        let value = items
            .next()
            .map(|v| value::bytes(v, "RendezvousInstr.value"))
            .transpose()?;
        if items.next().is_some() {
            return Err(SerializationError::malformed("RendezvousInstr", "too many elements"));
        }
        Ok(Self { variable, value })
    }
}

/// `RendezvousInfo = [[RendezvousInstr...]...]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RendezvousInfo(pub Vec<Vec<RendezvousInstr>>);

impl RendezvousInfo {
    /// One directive per URL; only `http` and `https` are accepted.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] for unparseable URLs or other schemes.
    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> ProtocolResult<Self> {
        urls.iter()
            .map(|u| directive_for_url(u.as_ref()))
            .collect::<ProtocolResult<Vec<_>>>()
            .map(Self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn parse_http_url(raw: &str) -> ProtocolResult<(Url, String, u16, bool)> {
    let url = Url::parse(raw).map_err(|e| ProtocolError::Decode(format!("{raw}: {e}")))?;
    let https = match url.scheme() {
        "http" => false,
        "https" => true,
        other => {
            return Err(ProtocolError::Decode(format!(
                "{raw}: unsupported scheme {other}"
            )));
        }
    };
    let host = url
        .host_str()
        .ok_or_else(|| ProtocolError::Decode(format!("{raw}: missing host")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();
    let port = url.port_or_known_default().unwrap_or(if https { 443 } else { 80 });
    Ok((url, host, port, https))
}

fn directive_for_url(raw: &str) -> ProtocolResult<Vec<RendezvousInstr>> {
    let (_, host, port, https) = parse_http_url(raw)?;
    let protocol = if https {
        RvProtocolValue::Https
    } else {
        RvProtocolValue::Http
    };
    let port_value = uint(port.into());
    let mut directive = vec![
        RendezvousInstr::with_value(RvVariable::Protocol, &uint(protocol as u64))?,
        RendezvousInstr::with_value(RvVariable::DevPort, &port_value)?,
        RendezvousInstr::with_value(RvVariable::OwnerPort, &port_value)?,
    ];
    directive.push(match host.parse::<IpAddr>() {
        Ok(ip) => RendezvousInstr::with_value(RvVariable::IpAddress, &bstr(ip_bytes(ip)))?,
        Err(_) => RendezvousInstr::with_value(RvVariable::Dns, &tstr(host))?,
    });
    Ok(directive)
}

fn ip_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

impl CborCodec for RendezvousInfo {
    fn to_value(&self) -> SerializationResult<Value> {
        self.0
            .iter()
            .map(|directive| {
                directive
                    .iter()
                    .map(CborCodec::to_value)
                    .collect::<SerializationResult<Vec<_>>>()
                    .map(Value::Array)
            })
            .collect::<SerializationResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        value::array(v, "RendezvousInfo")?
            .into_iter()
            .map(|directive| {
                value::array(directive, "RendezvousDirective")?
                    .into_iter()
                    .map(RendezvousInstr::from_value)
                    .collect()
            })
            .collect::<SerializationResult<Vec<_>>>()
            .map(Self)
    }
}

/// Transport protocol of an owner address in `to1d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Tls,
    Http,
    Coap,
    Https,
    Coaps,
}

impl TransportProtocol {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Tcp => 1,
            Self::Tls => 2,
            Self::Http => 3,
            Self::Coap => 4,
            Self::Https => 5,
            Self::Coaps => 6,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Tcp,
            2 => Self::Tls,
            3 => Self::Http,
            4 => Self::Coap,
            5 => Self::Https,
            6 => Self::Coaps,
            _ => return None,
        })
    }
}

/// `RVTO2AddrEntry = [ip / null, dns / null, port, protocol]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RvTo2Addr {
    pub ip: Option<Vec<u8>>,
    pub dns: Option<String>,
    pub port: u16,
    pub protocol: TransportProtocol,
}

impl RvTo2Addr {
    /// Owner address for an `http`/`https` URL.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] for unparseable URLs or other schemes.
    pub fn from_url(raw: &str) -> ProtocolResult<Self> {
        let (_, host, port, https) = parse_http_url(raw)?;
        let (ip, dns) = match host.parse::<IpAddr>() {
            Ok(ip) => (Some(ip_bytes(ip)), None),
            Err(_) => (None, Some(host)),
        };
        Ok(Self {
            ip,
            dns,
            port,
            protocol: if https {
                TransportProtocol::Https
            } else {
                TransportProtocol::Http
            },
        })
    }

    /// An entry must name the owner somehow.
    #[must_use]
    pub fn has_host(&self) -> bool {
        self.ip.as_ref().is_some_and(|ip| !ip.is_empty())
            || self.dns.as_ref().is_some_and(|dns| !dns.is_empty())
    }
}

impl CborCodec for RvTo2Addr {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            self.ip.clone().map_or(Value::Null, bstr),
            self.dns.clone().map_or(Value::Null, tstr),
            uint(self.port.into()),
            uint(self.protocol.code().into()),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [ip, dns, port, protocol] = value::fields(v, "RVTO2AddrEntry")?;
        let code: u8 = value::int(&protocol, "RVTO2AddrEntry.protocol")?;
        Ok(Self {
            ip: value::optional(ip)
                .map(|v| value::bytes(v, "RVTO2AddrEntry.ip"))
                .transpose()?,
            dns: value::optional(dns)
                .map(|v| value::text(v, "RVTO2AddrEntry.dns"))
                .transpose()?,
            port: value::int(&port, "RVTO2AddrEntry.port")?,
            protocol: TransportProtocol::from_code(code).ok_or_else(|| {
                SerializationError::malformed("RVTO2AddrEntry.protocol", format!("unknown {code}"))
            })?,
        })
    }
}

/// One service-info `[key, value]` pair; the value is a CBOR item.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfoKv {
    pub key: String,
    pub value: Value,
}

impl ServiceInfoKv {
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Module part of `module:message`.
    #[must_use]
    pub fn module(&self) -> &str {
        self.key.split_once(':').map_or(self.key.as_str(), |(m, _)| m)
    }
}

impl CborCodec for ServiceInfoKv {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![tstr(self.key.clone()), self.value.clone()]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [key, value] = value::fields(v, "ServiceInfoKV")?;
        Ok(Self {
            key: value::text(key, "ServiceInfoKV.key")?,
            value,
        })
    }
}

/// Encode a list of codec items as a CBOR array.
///
/// # Errors
/// Propagates the first item that fails to encode.
pub fn list_to_value<T: CborCodec>(items: &[T]) -> SerializationResult<Value> {
    items
        .iter()
        .map(CborCodec::to_value)
        .collect::<SerializationResult<Vec<_>>>()
        .map(Value::Array)
}

/// Decode a CBOR array of codec items.
///
/// # Errors
/// Fails if `v` is not an array or any item does not decode.
pub fn list_from_value<T: CborCodec>(v: Value, what: &'static str) -> SerializationResult<Vec<T>> {
    value::array(v, what)?.into_iter().map(T::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_hex_roundtrip() {
        let g = Guid::random();
        assert_eq!(g.to_string().parse::<Guid>().unwrap(), g);
        assert!("abcd".parse::<Guid>().is_err());
        assert_eq!(Guid::from_bytes(&g.to_bytes().unwrap()).unwrap(), g);
    }

    #[test]
    fn short_nonce_rejected() {
        let v = bstr(vec![0u8; 15]);
        assert!(Nonce::from_value(v).is_err());
    }

    #[test]
    fn rvinfo_from_urls() {
        let info = RendezvousInfo::from_urls(&["http://rv.example", "https://10.0.0.1:8443"]).unwrap();
        assert_eq!(info.0.len(), 2);

        let first = &info.0[0];
        assert_eq!(first[0].variable, RvVariable::Protocol);
        assert_eq!(first[1].decoded_value().unwrap(), Some(uint(80)));
        assert_eq!(first[3].variable, RvVariable::Dns);
        assert_eq!(first[3].decoded_value().unwrap(), Some(tstr("rv.example")));

        let second = &info.0[1];
        assert_eq!(second[0].decoded_value().unwrap(), Some(uint(RvProtocolValue::Https as u64)));
        assert_eq!(second[2].decoded_value().unwrap(), Some(uint(8443)));
        assert_eq!(second[3].variable, RvVariable::IpAddress);

        let back = RendezvousInfo::from_bytes(&info.to_bytes().unwrap()).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn rvinfo_rejects_other_schemes() {
        assert!(RendezvousInfo::from_urls(&["ftp://rv.example"]).is_err());
        assert!(RendezvousInfo::from_urls(&["not a url"]).is_err());
    }

    #[test]
    fn flag_instruction_has_no_value() {
        let instr = RendezvousInstr {
            variable: RvVariable::DevOnly,
            value: None,
        };
        let v = instr.to_value().unwrap();
        assert_eq!(v, Value::Array(vec![uint(0)]));
        assert_eq!(RendezvousInstr::from_value(v).unwrap(), instr);
    }

    #[test]
    fn to2_addr_from_url() {
        let a = RvTo2Addr::from_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(a.ip, Some(vec![127, 0, 0, 1]));
        assert_eq!(a.dns, None);
        assert_eq!(a.port, 8080);
        assert_eq!(a.protocol, TransportProtocol::Http);
        assert!(a.has_host());

        let b = RvTo2Addr::from_url("https://owner.example").unwrap();
        assert_eq!(b.dns.as_deref(), Some("owner.example"));
        assert_eq!(b.port, 443);
        assert_eq!(RvTo2Addr::from_bytes(&b.to_bytes().unwrap()).unwrap(), b);

        let empty = RvTo2Addr {
            ip: None,
            dns: None,
            port: 80,
            protocol: TransportProtocol::Http,
        };
        assert!(!empty.has_host());
    }

    #[test]
    fn service_info_module_split() {
        let kv = ServiceInfoKv::new("devmod:os", tstr("linux"));
        assert_eq!(kv.module(), "devmod");
        assert_eq!(ServiceInfoKv::new("bare", Value::Null).module(), "bare");
    }
}
