//! Conformance test identities.
//!
//! Every identity names exactly one check: one protocol message and one fault
//! category. Identities are grouped by who drives the exchange:
//!
//! - `RVT`: this tool registers with a rendezvous server (TO0)
//! - `DEVT`: this tool plays a device against a rendezvous server (TO1)
//! - `DOT`: this tool plays a device against an owner service (TO2)
//! - `VOUCHER`: malformed vouchers offered through `TO0.OwnerSign`, or
//!   loaded at an owner and reached with `TO2.HelloDevice`
//! - `LISTENER`: a device under test drives this tool (TO1 and TO2)

use fdo_protocol::voucher::VoucherFault;
use fdo_protocol::{Cmd, FdoErrorCode, Protocol};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// What an identity does to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    /// Unmodified exchange; must succeed.
    Positive,
    /// The reply must decode as a success message.
    CheckResponse,
    /// Body bytes scrambled.
    BadEncoding,
    /// A nonce replaced by a fresh one.
    BadNonce,
    /// Signature bytes corrupted.
    BadSignature,
    /// Identity (GUID) the peer cannot know.
    UnknownIdentity,
    /// Index past the end of a list.
    BadIndex,
    /// Completion signalled out of turn.
    BadCompletion,
    /// Encryption envelope corrupted.
    BadEncryption,
    /// A header or descriptor field holds a wrong value.
    BadHeaderField,
    /// Structurally or cryptographically broken voucher.
    BadVoucher,
}

/// Which side of the exchange an identity exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestGroup {
    Rvt,
    Devt,
    Dot,
    Voucher,
    Listener,
}

macro_rules! test_ids {
    ($($variant:ident => $code:literal, $group:ident, $cmd:ident, $category:ident;)+) => {
        /// A single conformance check.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TestId {
            $($variant,)+
        }

        impl TestId {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Stable code, also the serde form.
            #[must_use]
            pub const fn code(self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            #[must_use]
            pub const fn group(self) -> TestGroup {
                match self {
                    $(Self::$variant => TestGroup::$group,)+
                }
            }

            /// The message this identity acts on.
            #[must_use]
            pub const fn cmd(self) -> Cmd {
                match self {
                    $(Self::$variant => Cmd::$cmd,)+
                }
            }

            #[must_use]
            pub const fn category(self) -> FaultCategory {
                match self {
                    $(Self::$variant => FaultCategory::$category,)+
                }
            }
        }

        impl FromStr for TestId {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok(Self::$variant),)+
                    other => Err(format!("unknown test id {other}")),
                }
            }
        }
    };
}

test_ids! {
    Rvt20BadEncoding => "FIDO_RVT_20_BAD_ENCODING", Rvt, To0Hello, BadEncoding;
    Rvt20Positive => "FIDO_RVT_20_POSITIVE", Rvt, To0Hello, Positive;
    Rvt21CheckResp => "FIDO_RVT_21_CHECK_RESP", Rvt, To0HelloAck, CheckResponse;
    Rvt22BadEncoding => "FIDO_RVT_22_BAD_ENCODING", Rvt, To0OwnerSign, BadEncoding;
    Rvt22BadOwnerSignEncoding => "FIDO_RVT_22_BAD_OWNERSIGN_ENCODING", Rvt, To0OwnerSign, BadEncoding;
    Rvt22BadTo0dEncoding => "FIDO_RVT_22_BAD_TO0D_ENCODING", Rvt, To0OwnerSign, BadEncoding;
    Rvt22BadTo0dHash => "FIDO_RVT_22_BAD_TO0D_HASH", Rvt, To0OwnerSign, BadSignature;
    Rvt22BadTo0SignNonce => "FIDO_RVT_22_BAD_TO0SIGN_NONCE", Rvt, To0OwnerSign, BadNonce;
    Rvt22BadSignature => "FIDO_RVT_22_BAD_SIGNATURE", Rvt, To0OwnerSign, BadSignature;
    Rvt23CheckResp => "FIDO_RVT_23_CHECK_RESP", Rvt, To0AcceptOwner, CheckResponse;
    Rvt23Positive => "FIDO_RVT_23_POSITIVE", Rvt, To0AcceptOwner, Positive;

    Devt30BadEncoding => "FIDO_DEVT_30_BAD_ENCODING", Devt, To1HelloRv, BadEncoding;
    Devt30BadSigInfo => "FIDO_DEVT_30_BAD_SIGINFO", Devt, To1HelloRv, BadHeaderField;
    Devt30BadUnknownGuid => "FIDO_DEVT_30_BAD_UNKNOWN_GUID", Devt, To1HelloRv, UnknownIdentity;
    Devt30Positive => "FIDO_DEVT_30_POSITIVE", Devt, To1HelloRv, Positive;
    Devt32BadEncoding => "FIDO_DEVT_32_BAD_ENCODING", Devt, To1ProveToRv, BadEncoding;
    Devt32BadProveToRvPayloadEncoding => "FIDO_DEVT_32_BAD_PROVE_TO_RV_PAYLOAD_ENCODING", Devt, To1ProveToRv, BadEncoding;
    Devt32BadSignature => "FIDO_DEVT_32_BAD_SIGNATURE", Devt, To1ProveToRv, BadSignature;
    Devt32BadTo1ProofNonce => "FIDO_DEVT_32_BAD_TO1PROOF_NONCE", Devt, To1ProveToRv, BadNonce;
    Devt33Positive => "FIDO_DEVT_33_POSITIVE", Devt, To1RvRedirect, Positive;

    Dot60BadEncoding => "FIDO_DOT_60_BAD_ENCODING", Dot, To2HelloDevice, BadEncoding;
    Dot60Positive => "FIDO_DOT_60_POSITIVE", Dot, To2HelloDevice, Positive;
    Dot62BadEncoding => "FIDO_DOT_62_BAD_ENCODING", Dot, To2GetOvNextEntry, BadEncoding;
    Dot62GetOvNextBadIndex => "FIDO_DOT_62_GETOVNEXT_BAD_INDEX", Dot, To2GetOvNextEntry, BadIndex;
    Dot62Positive => "FIDO_DOT_62_POSITIVE", Dot, To2GetOvNextEntry, Positive;
    Dot64BadNonceProveDv61 => "FIDO_DOT_64_BAD_NONCE_PROVEDV61", Dot, To2ProveDevice, BadNonce;
    Dot64BadSignature => "FIDO_DOT_64_BAD_SIGNATURE", Dot, To2ProveDevice, BadSignature;
    Dot64Positive => "FIDO_DOT_64_POSITIVE", Dot, To2ProveDevice, Positive;
    Dot66BadSrvInfoPayload => "FIDO_DOT_66_BAD_SRVINFO_PAYLOAD", Dot, To2DeviceServiceInfoReady, BadEncoding;
    Dot66BadEncryption => "FIDO_DOT_66_BAD_ENCRYPTION", Dot, To2DeviceServiceInfoReady, BadEncryption;
    Dot66Positive => "FIDO_DOT_66_POSITIVE", Dot, To2DeviceServiceInfoReady, Positive;
    Dot68BadEncoding => "FIDO_DOT_68_BAD_ENCODING", Dot, To2DeviceServiceInfo, BadEncoding;
    Dot68BadEncryption => "FIDO_DOT_68_BAD_ENCRYPTION", Dot, To2DeviceServiceInfo, BadEncryption;
    Dot68BadCompletionLogic => "FIDO_DOT_68_BAD_COMPLETION_LOGIC", Dot, To2DeviceServiceInfo, BadCompletion;
    Dot68Positive => "FIDO_DOT_68_POSITIVE", Dot, To2DeviceServiceInfo, Positive;
    Dot70BadEncoding => "FIDO_DOT_70_BAD_ENCODING", Dot, To2Done, BadEncoding;
    Dot70BadEncryption => "FIDO_DOT_70_BAD_ENCRYPTION", Dot, To2Done, BadEncryption;
    Dot70BadNonceProveDv61 => "FIDO_DOT_70_BAD_NONCE_PROVE_DV_61", Dot, To2Done, BadNonce;
    Dot70Positive => "FIDO_DOT_70_POSITIVE", Dot, To2Done, Positive;

    VoucherHeaderBadProtVersion => "FIDO_VOUCHER_HEADER_BAD_PROT_VERSION", Voucher, To0OwnerSign, BadVoucher;
    VoucherHeaderBadRvInfoEmpty => "FIDO_VOUCHER_HEADER_BAD_RVINFO_EMPTY", Voucher, To0OwnerSign, BadVoucher;
    VoucherHeaderBadDeviceInfoEmpty => "FIDO_VOUCHER_HEADER_BAD_DEVICEINFO_EMPTY", Voucher, To0OwnerSign, BadVoucher;
    VoucherHeaderBadPubKey => "FIDO_VOUCHER_HEADER_BAD_PUBKEY", Voucher, To0OwnerSign, BadVoucher;
    VoucherHeaderBadCertChainHash => "FIDO_VOUCHER_HEADER_BAD_CERTCHAIN_HASH", Voucher, To0OwnerSign, BadVoucher;
    VoucherEntryBadPrevHash => "FIDO_VOUCHER_ENTRY_BAD_PREV_HASH", Voucher, To0OwnerSign, BadVoucher;
    VoucherEntryBadHdrInfoHash => "FIDO_VOUCHER_ENTRY_BAD_HDRINFO_HASH", Voucher, To0OwnerSign, BadVoucher;
    VoucherEntryBadSgType => "FIDO_VOUCHER_ENTRY_BAD_SG_TYPE", Voucher, To0OwnerSign, BadVoucher;
    VoucherEntryBadSignature => "FIDO_VOUCHER_ENTRY_BAD_SIGNATURE", Voucher, To0OwnerSign, BadVoucher;
    VoucherEntryBadPubKey => "FIDO_VOUCHER_ENTRY_BAD_PUBKEY", Voucher, To0OwnerSign, BadVoucher;
    VoucherBadProtVersion => "FIDO_VOUCHER_BAD_PROT_VERSION", Voucher, To0OwnerSign, BadVoucher;
    VoucherBadHeaderBytes => "FIDO_VOUCHER_BAD_HEADER_BYTES", Voucher, To0OwnerSign, BadVoucher;
    VoucherBadHdrHmac => "FIDO_VOUCHER_BAD_HDR_HMAC", Voucher, To0OwnerSign, BadVoucher;
    VoucherBadEmptyEntries => "FIDO_VOUCHER_BAD_EMPTY_ENTRIES", Voucher, To0OwnerSign, BadVoucher;

    Listener30Positive => "FIDO_LISTENER_DEVICE_30_POSITIVE", Listener, To1HelloRv, Positive;
    Listener30BadEncoding => "FIDO_LISTENER_DEVICE_30_BAD_ENCODING", Listener, To1HelloRv, BadEncoding;
    Listener32Positive => "FIDO_LISTENER_DEVICE_32_POSITIVE", Listener, To1ProveToRv, Positive;
    Listener32BadEncoding => "FIDO_LISTENER_DEVICE_32_BAD_ENCODING", Listener, To1ProveToRv, BadEncoding;
    Listener32BadTo1d => "FIDO_LISTENER_DEVICE_32_BAD_TO1D", Listener, To1ProveToRv, BadSignature;
    Listener60Positive => "FIDO_LISTENER_DEVICE_60_POSITIVE", Listener, To2HelloDevice, Positive;
    Listener60BadHelloDeviceHash => "FIDO_LISTENER_DEVICE_60_BAD_HELLODEVICEHASH", Listener, To2HelloDevice, BadSignature;
    Listener60BadNonceTo2ProveOv => "FIDO_LISTENER_DEVICE_60_BAD_NONCE_TO2PROVEOV", Listener, To2HelloDevice, BadNonce;
    Listener60BadEbSigInfo => "FIDO_LISTENER_DEVICE_60_BAD_EBSIGNINFO", Listener, To2HelloDevice, BadHeaderField;
    Listener60BadOvHdrOvHeader => "FIDO_LISTENER_DEVICE_60_BAD_OVHDR_OVHEADER", Listener, To2HelloDevice, BadVoucher;
    Listener60BadHelloAckPayloadEncoding => "FIDO_LISTENER_DEVICE_60_BAD_HELLOACK_PAYLOAD_ENCODING", Listener, To2HelloDevice, BadEncoding;
    Listener60BadCoseSignature => "FIDO_LISTENER_DEVICE_60_BAD_COSE_SIGNATURE", Listener, To2HelloDevice, BadSignature;
    Listener60BadHelloAckEncoding => "FIDO_LISTENER_DEVICE_60_BAD_HELLOACK_ENCODING", Listener, To2HelloDevice, BadEncoding;
    Listener60MissingAuthzHeader => "FIDO_LISTENER_DEVICE_60_MISSING_AUTHZ_HEADER", Listener, To2HelloDevice, BadHeaderField;
    Listener62Positive => "FIDO_LISTENER_DEVICE_62_POSITIVE", Listener, To2GetOvNextEntry, Positive;
    Listener62BadOvEntryCoseSignature => "FIDO_LISTENER_DEVICE_62_BAD_OVENTRY_COSE_SIGNATURE", Listener, To2GetOvNextEntry, BadSignature;
    Listener62BadOvEntryNum => "FIDO_LISTENER_DEVICE_62_BAD_OVENTRYNUM", Listener, To2GetOvNextEntry, BadIndex;
    Listener62BadOvNextEntryPayload => "FIDO_LISTENER_DEVICE_62_BAD_OVNEXTENTRY_PAYLOAD", Listener, To2GetOvNextEntry, BadEncoding;
    Listener64Positive => "FIDO_LISTENER_DEVICE_64_POSITIVE", Listener, To2ProveDevice, Positive;
    Listener64BadNonceTo2SetupDv => "FIDO_LISTENER_DEVICE_64_BAD_NONCE_TO2SETUPDV", Listener, To2ProveDevice, BadNonce;
    Listener64BadSetupDevicePayload => "FIDO_LISTENER_DEVICE_64_BAD_SETUPDEVICE_PAYLOAD", Listener, To2ProveDevice, BadEncoding;
    Listener64BadSetupDeviceCoseSignature => "FIDO_LISTENER_DEVICE_64_BAD_SETUPDEVICE_COSE_SIGNATURE", Listener, To2ProveDevice, BadSignature;
    Listener64BadSetupDeviceBytes => "FIDO_LISTENER_DEVICE_64_BAD_SETUPDEVICE_BYTES", Listener, To2ProveDevice, BadEncoding;
    Listener64BadEncWrapping => "FIDO_LISTENER_DEVICE_64_BAD_ENC_WRAPPING", Listener, To2ProveDevice, BadEncryption;
    Listener64BadSetupDeviceEncoding => "FIDO_LISTENER_DEVICE_64_BAD_SETUPDEVICE_ENCODING", Listener, To2ProveDevice, BadEncoding;
    Listener66Positive => "FIDO_LISTENER_DEVICE_66_POSITIVE", Listener, To2DeviceServiceInfoReady, Positive;
    Listener66BadEncoding => "FIDO_LISTENER_DEVICE_66_BAD_ENCODING", Listener, To2DeviceServiceInfoReady, BadEncoding;
    Listener66BadEncWrapping => "FIDO_LISTENER_DEVICE_66_BAD_ENC_WRAPPING", Listener, To2DeviceServiceInfoReady, BadEncryption;
    Listener68Positive => "FIDO_LISTENER_DEVICE_68_POSITIVE", Listener, To2DeviceServiceInfo, Positive;
    Listener70Positive => "FIDO_LISTENER_DEVICE_70_POSITIVE", Listener, To2Done, Positive;
    Listener70BadDone71Encoding => "FIDO_LISTENER_DEVICE_70_BAD_DONE71_ENCODING", Listener, To2Done, BadEncoding;
    Listener70BadEncWrapping => "FIDO_LISTENER_DEVICE_70_BAD_ENC_WRAPPING", Listener, To2Done, BadEncryption;
    Listener70BadNonceTo2SetupDv64 => "FIDO_LISTENER_DEVICE_70_BAD_NONCE_TO2SETUPDV64", Listener, To2Done, BadNonce;
}

pub const RVT_20: &[TestId] = &[TestId::Rvt20BadEncoding, TestId::Rvt20Positive];
pub const RVT_21: &[TestId] = &[TestId::Rvt21CheckResp];
pub const RVT_22: &[TestId] = &[
    TestId::Rvt22BadEncoding,
    TestId::Rvt22BadOwnerSignEncoding,
    TestId::Rvt22BadTo0dEncoding,
    TestId::Rvt22BadTo0dHash,
    TestId::Rvt22BadTo0SignNonce,
    TestId::Rvt22BadSignature,
];
pub const RVT_23: &[TestId] = &[TestId::Rvt23CheckResp, TestId::Rvt23Positive];

pub const DEVT_30: &[TestId] = &[
    TestId::Devt30BadEncoding,
    TestId::Devt30BadSigInfo,
    TestId::Devt30BadUnknownGuid,
    TestId::Devt30Positive,
];
pub const DEVT_32: &[TestId] = &[
    TestId::Devt32BadEncoding,
    TestId::Devt32BadProveToRvPayloadEncoding,
    TestId::Devt32BadSignature,
    TestId::Devt32BadTo1ProofNonce,
];
pub const DEVT_33: &[TestId] = &[TestId::Devt33Positive];

pub const DOT_60: &[TestId] = &[TestId::Dot60BadEncoding, TestId::Dot60Positive];
pub const DOT_62: &[TestId] = &[
    TestId::Dot62BadEncoding,
    TestId::Dot62GetOvNextBadIndex,
    TestId::Dot62Positive,
];
pub const DOT_64: &[TestId] = &[
    TestId::Dot64BadNonceProveDv61,
    TestId::Dot64BadSignature,
    TestId::Dot64Positive,
];
pub const DOT_66: &[TestId] = &[
    TestId::Dot66BadSrvInfoPayload,
    TestId::Dot66BadEncryption,
    TestId::Dot66Positive,
];
pub const DOT_68: &[TestId] = &[
    TestId::Dot68BadEncoding,
    TestId::Dot68BadEncryption,
    TestId::Dot68BadCompletionLogic,
    TestId::Dot68Positive,
];
pub const DOT_70: &[TestId] = &[
    TestId::Dot70BadEncoding,
    TestId::Dot70BadEncryption,
    TestId::Dot70BadNonceProveDv61,
    TestId::Dot70Positive,
];

pub const VOUCHER: &[TestId] = &[
    TestId::VoucherHeaderBadProtVersion,
    TestId::VoucherHeaderBadRvInfoEmpty,
    TestId::VoucherHeaderBadDeviceInfoEmpty,
    TestId::VoucherHeaderBadPubKey,
    TestId::VoucherHeaderBadCertChainHash,
    TestId::VoucherEntryBadPrevHash,
    TestId::VoucherEntryBadHdrInfoHash,
    TestId::VoucherEntryBadSgType,
    TestId::VoucherEntryBadSignature,
    TestId::VoucherEntryBadPubKey,
    TestId::VoucherBadProtVersion,
    TestId::VoucherBadHeaderBytes,
    TestId::VoucherBadHdrHmac,
    TestId::VoucherBadEmptyEntries,
];

/// Listener queues end with the message's positive identity, which lets the
/// device through to the next message.
pub const LISTENER_30: &[TestId] = &[TestId::Listener30BadEncoding, TestId::Listener30Positive];
pub const LISTENER_32: &[TestId] = &[
    TestId::Listener32BadEncoding,
    TestId::Listener32BadTo1d,
    TestId::Listener32Positive,
];
pub const LISTENER_60: &[TestId] = &[
    TestId::Listener60BadHelloDeviceHash,
    TestId::Listener60BadNonceTo2ProveOv,
    TestId::Listener60BadEbSigInfo,
    TestId::Listener60BadOvHdrOvHeader,
    TestId::Listener60BadHelloAckPayloadEncoding,
    TestId::Listener60BadCoseSignature,
    TestId::Listener60BadHelloAckEncoding,
    TestId::Listener60MissingAuthzHeader,
    TestId::Listener60Positive,
];
pub const LISTENER_62: &[TestId] = &[
    TestId::Listener62BadOvEntryCoseSignature,
    TestId::Listener62BadOvEntryNum,
    TestId::Listener62BadOvNextEntryPayload,
    TestId::Listener62Positive,
];
pub const LISTENER_64: &[TestId] = &[
    TestId::Listener64BadNonceTo2SetupDv,
    TestId::Listener64BadSetupDevicePayload,
    TestId::Listener64BadSetupDeviceCoseSignature,
    TestId::Listener64BadSetupDeviceBytes,
    TestId::Listener64BadEncWrapping,
    TestId::Listener64BadSetupDeviceEncoding,
    TestId::Listener64Positive,
];
pub const LISTENER_66: &[TestId] = &[
    TestId::Listener66BadEncoding,
    TestId::Listener66BadEncWrapping,
    TestId::Listener66Positive,
];
pub const LISTENER_68: &[TestId] = &[TestId::Listener68Positive];
pub const LISTENER_70: &[TestId] = &[
    TestId::Listener70BadDone71Encoding,
    TestId::Listener70BadEncWrapping,
    TestId::Listener70BadNonceTo2SetupDv64,
    TestId::Listener70Positive,
];

impl TestId {
    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self.category(), FaultCategory::Positive)
    }

    /// Identities that expect the peer to reject the message.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        !matches!(
            self.category(),
            FaultCategory::Positive | FaultCategory::CheckResponse
        )
    }

    /// Error the peer is expected to answer a negative identity with.
    ///
    /// Peers legitimately differ in the code they pick, so a mismatch is
    /// reported but tolerated by [`crate::matcher::check_expected_error`].
    #[must_use]
    pub const fn expected_error(self) -> Option<FdoErrorCode> {
        match self.category() {
            FaultCategory::Positive | FaultCategory::CheckResponse => None,
            FaultCategory::UnknownIdentity => Some(FdoErrorCode::ResourceNotFound),
            FaultCategory::BadNonce | FaultCategory::BadSignature | FaultCategory::BadEncryption => {
                Some(FdoErrorCode::InvalidMessageError)
            }
            FaultCategory::BadEncoding
            | FaultCategory::BadIndex
            | FaultCategory::BadCompletion
            | FaultCategory::BadHeaderField
            | FaultCategory::BadVoucher => Some(FdoErrorCode::MessageBodyError),
        }
    }

    /// Voucher defect for `VOUCHER` identities.
    #[must_use]
    pub const fn voucher_fault(self) -> Option<VoucherFault> {
        Some(match self {
            Self::VoucherHeaderBadProtVersion => VoucherFault::HeaderBadProtVersion,
            Self::VoucherHeaderBadRvInfoEmpty => VoucherFault::HeaderBadRvinfoEmpty,
            Self::VoucherHeaderBadDeviceInfoEmpty => VoucherFault::HeaderBadDeviceinfoEmpty,
            Self::VoucherHeaderBadPubKey => VoucherFault::HeaderBadPubkey,
            Self::VoucherHeaderBadCertChainHash => VoucherFault::HeaderBadCertchainHash,
            Self::VoucherEntryBadPrevHash => VoucherFault::EntryBadPrevHash,
            Self::VoucherEntryBadHdrInfoHash => VoucherFault::EntryBadHdrinfoHash,
            Self::VoucherEntryBadSgType => VoucherFault::EntryBadSgType,
            Self::VoucherEntryBadSignature => VoucherFault::EntryBadSignature,
            Self::VoucherEntryBadPubKey => VoucherFault::EntryBadPubkey,
            Self::VoucherBadProtVersion => VoucherFault::BadProtVersion,
            Self::VoucherBadHeaderBytes => VoucherFault::BadHeaderBytes,
            Self::VoucherBadHdrHmac => VoucherFault::BadHdrHmac,
            Self::VoucherBadEmptyEntries => VoucherFault::BadEmptyEntries,
            _ => return None,
        })
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for TestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for TestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        code.parse().map_err(serde::de::Error::custom)
    }
}

/// Identities a requestor campaign runs, in execution order.
#[must_use]
pub fn campaign_tests(protocol: Protocol) -> Vec<TestId> {
    let lists: &[&[TestId]] = match protocol {
        Protocol::To0 => &[RVT_20, RVT_21, RVT_22, RVT_23, VOUCHER],
        Protocol::To1 => &[DEVT_30, DEVT_32, DEVT_33],
        Protocol::To2 => &[DOT_60, VOUCHER, DOT_62, DOT_64, DOT_66, DOT_68, DOT_70],
    };
    lists.iter().flat_map(|l| l.iter().copied()).collect()
}

/// Listener queue for a device-initiated message.
#[must_use]
pub const fn listener_tests(cmd: Cmd) -> &'static [TestId] {
    match cmd {
        Cmd::To1HelloRv => LISTENER_30,
        Cmd::To1ProveToRv => LISTENER_32,
        Cmd::To2HelloDevice => LISTENER_60,
        Cmd::To2GetOvNextEntry => LISTENER_62,
        Cmd::To2ProveDevice => LISTENER_64,
        Cmd::To2DeviceServiceInfoReady => LISTENER_66,
        Cmd::To2DeviceServiceInfo => LISTENER_68,
        Cmd::To2Done => LISTENER_70,
        _ => &[],
    }
}

/// Requests a device sends in a listener-driven run of `protocol`.
#[must_use]
pub const fn listener_cmds(protocol: Protocol) -> &'static [Cmd] {
    match protocol {
        Protocol::To0 => &[],
        Protocol::To1 => &[Cmd::To1HelloRv, Cmd::To1ProveToRv],
        Protocol::To2 => &[
            Cmd::To2HelloDevice,
            Cmd::To2GetOvNextEntry,
            Cmd::To2ProveDevice,
            Cmd::To2DeviceServiceInfoReady,
            Cmd::To2DeviceServiceInfo,
            Cmd::To2Done,
        ],
    }
}
