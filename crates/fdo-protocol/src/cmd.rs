//! FDO message numbers and the sub-protocol each belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transfer-ownership sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Rendezvous registration (owner to RV).
    To0,
    /// Redirect discovery (device to RV).
    To1,
    /// Ownership transfer (device to owner).
    To2,
}

impl Protocol {
    pub const ALL: [Self; 3] = [Self::To0, Self::To1, Self::To2];

    /// The message that opens a session for this protocol.
    #[must_use]
    pub const fn first_cmd(self) -> Cmd {
        match self {
            Self::To0 => Cmd::To0Hello,
            Self::To1 => Cmd::To1HelloRv,
            Self::To2 => Cmd::To2HelloDevice,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::To0 => "to0",
            Self::To1 => "to1",
            Self::To2 => "to2",
        })
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "to0" => Ok(Self::To0),
            "to1" => Ok(Self::To1),
            "to2" => Ok(Self::To2),
            other => Err(format!("unknown protocol {other:?} (expected to0, to1 or to2)")),
        }
    }
}

/// FDO message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Cmd {
    To0Hello,
    To0HelloAck,
    To0OwnerSign,
    To0AcceptOwner,
    To1HelloRv,
    To1HelloRvAck,
    To1ProveToRv,
    To1RvRedirect,
    To2HelloDevice,
    To2ProveOvHdr,
    To2GetOvNextEntry,
    To2OvNextEntry,
    To2ProveDevice,
    To2SetupDevice,
    To2DeviceServiceInfoReady,
    To2OwnerServiceInfoReady,
    To2DeviceServiceInfo,
    To2OwnerServiceInfo,
    To2Done,
    To2Done2,
    Error,
}

impl Cmd {
    /// Every request a client sends, in protocol order.
    pub const REQUESTS: [Self; 10] = [
        Self::To0Hello,
        Self::To0OwnerSign,
        Self::To1HelloRv,
        Self::To1ProveToRv,
        Self::To2HelloDevice,
        Self::To2GetOvNextEntry,
        Self::To2ProveDevice,
        Self::To2DeviceServiceInfoReady,
        Self::To2DeviceServiceInfo,
        Self::To2Done,
    ];

    /// Wire message number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::To0Hello => 20,
            Self::To0HelloAck => 21,
            Self::To0OwnerSign => 22,
            Self::To0AcceptOwner => 23,
            Self::To1HelloRv => 30,
            Self::To1HelloRvAck => 31,
            Self::To1ProveToRv => 32,
            Self::To1RvRedirect => 33,
            Self::To2HelloDevice => 60,
            Self::To2ProveOvHdr => 61,
            Self::To2GetOvNextEntry => 62,
            Self::To2OvNextEntry => 63,
            Self::To2ProveDevice => 64,
            Self::To2SetupDevice => 65,
            Self::To2DeviceServiceInfoReady => 66,
            Self::To2OwnerServiceInfoReady => 67,
            Self::To2DeviceServiceInfo => 68,
            Self::To2OwnerServiceInfo => 69,
            Self::To2Done => 70,
            Self::To2Done2 => 71,
            Self::Error => 255,
        }
    }

    /// Parse a wire message number.
    #[must_use]
    pub const fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            20 => Self::To0Hello,
            21 => Self::To0HelloAck,
            22 => Self::To0OwnerSign,
            23 => Self::To0AcceptOwner,
            30 => Self::To1HelloRv,
            31 => Self::To1HelloRvAck,
            32 => Self::To1ProveToRv,
            33 => Self::To1RvRedirect,
            60 => Self::To2HelloDevice,
            61 => Self::To2ProveOvHdr,
            62 => Self::To2GetOvNextEntry,
            63 => Self::To2OvNextEntry,
            64 => Self::To2ProveDevice,
            65 => Self::To2SetupDevice,
            66 => Self::To2DeviceServiceInfoReady,
            67 => Self::To2OwnerServiceInfoReady,
            68 => Self::To2DeviceServiceInfo,
            69 => Self::To2OwnerServiceInfo,
            70 => Self::To2Done,
            71 => Self::To2Done2,
            255 => Self::Error,
            _ => return None,
        })
    }

    /// Sub-protocol, `None` for the error message.
    #[must_use]
    pub const fn protocol(self) -> Option<Protocol> {
        match self.number() {
            20..=23 => Some(Protocol::To0),
            30..=33 => Some(Protocol::To1),
            60..=71 => Some(Protocol::To2),
            _ => None,
        }
    }

    /// The response a server sends to this request.
    #[must_use]
    pub const fn reply(self) -> Option<Self> {
        Some(match self {
            Self::To0Hello => Self::To0HelloAck,
            Self::To0OwnerSign => Self::To0AcceptOwner,
            Self::To1HelloRv => Self::To1HelloRvAck,
            Self::To1ProveToRv => Self::To1RvRedirect,
            Self::To2HelloDevice => Self::To2ProveOvHdr,
            Self::To2GetOvNextEntry => Self::To2OvNextEntry,
            Self::To2ProveDevice => Self::To2SetupDevice,
            Self::To2DeviceServiceInfoReady => Self::To2OwnerServiceInfoReady,
            Self::To2DeviceServiceInfo => Self::To2OwnerServiceInfo,
            Self::To2Done => Self::To2Done2,
            _ => return None,
        })
    }

    /// Whether this message opens a new session.
    #[must_use]
    pub const fn starts_session(self) -> bool {
        matches!(self, Self::To0Hello | Self::To1HelloRv | Self::To2HelloDevice)
    }

    /// Whether this TO2 message travels inside the encryption envelope.
    ///
    /// ProveDevice itself is clear: it carries the device's key exchange share.
    #[must_use]
    pub const fn is_encrypted(self) -> bool {
        self.number() >= 65 && self.number() <= 71
    }

    /// Requests a server may accept after having answered `prev`.
    ///
    /// 62 repeats, and so does 68 while service info is still flowing. A
    /// device may skip 62 entirely and go straight to 64.
    #[must_use]
    pub const fn allowed_after(prev: Self) -> &'static [Self] {
        match prev {
            Self::To0Hello => &[Self::To0OwnerSign],
            Self::To1HelloRv => &[Self::To1ProveToRv],
            Self::To2HelloDevice => &[Self::To2GetOvNextEntry, Self::To2ProveDevice],
            Self::To2GetOvNextEntry => &[Self::To2GetOvNextEntry, Self::To2ProveDevice],
            Self::To2ProveDevice => &[Self::To2DeviceServiceInfoReady],
            Self::To2DeviceServiceInfoReady => &[Self::To2DeviceServiceInfo],
            Self::To2DeviceServiceInfo => &[Self::To2DeviceServiceInfo, Self::To2Done],
            _ => &[],
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl From<Cmd> for u8 {
    fn from(cmd: Cmd) -> Self {
        cmd.number()
    }
}

impl TryFrom<u8> for Cmd {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, String> {
        Self::from_number(n).ok_or_else(|| format!("unknown FDO message type {n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_roundtrip() {
        for n in 0..=u8::MAX {
            if let Some(cmd) = Cmd::from_number(n) {
                assert_eq!(cmd.number(), n);
            }
        }
        assert_eq!(Cmd::from_number(24), None);
    }

    #[test]
    fn conversion_from_u8_names_unknown_types() {
        assert_eq!(Cmd::try_from(255u8), Ok(Cmd::Error));
        assert_eq!(Cmd::try_from(69u8), Ok(Cmd::To2OwnerServiceInfo));
        let err = Cmd::try_from(24u8).unwrap_err();
        assert!(err.contains("24"), "{err}");
    }

    #[test]
    fn replies_stay_in_protocol() {
        for req in Cmd::REQUESTS {
            let reply = req.reply().unwrap();
            assert_eq!(reply.number(), req.number() + 1);
            assert_eq!(reply.protocol(), req.protocol());
        }
        assert_eq!(Cmd::Error.protocol(), None);
    }

    #[test]
    fn encryption_starts_at_prove_device() {
        assert!(!Cmd::To2OvNextEntry.is_encrypted());
        assert!(!Cmd::To2ProveDevice.is_encrypted());
        assert!(Cmd::To2SetupDevice.is_encrypted());
        assert!(Cmd::To2Done2.is_encrypted());
        assert!(!Cmd::Error.is_encrypted());
    }

    #[test]
    fn ordering_allows_entry_loop_and_skip() {
        let after_hello = Cmd::allowed_after(Cmd::To2HelloDevice);
        assert!(after_hello.contains(&Cmd::To2GetOvNextEntry));
        assert!(after_hello.contains(&Cmd::To2ProveDevice));
        assert!(!after_hello.contains(&Cmd::To2Done));
        assert!(Cmd::allowed_after(Cmd::To2Done).is_empty());
    }

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("TO2".parse::<Protocol>().unwrap(), Protocol::To2);
        assert!("to3".parse::<Protocol>().is_err());
    }
}
