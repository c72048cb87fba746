//! Transfer Ownership Protocol 2 (TO2).
//!
//! The device proves itself to its new owner and receives configuration:
//!
//! | Request | Reply |
//! |---|---|
//! | HelloDevice (60) | ProveOVHdr (61) |
//! | GetOVNextEntry (62) | OVNextEntry (63) |
//! | ProveDevice (64) | SetupDevice (65) |
//! | DeviceServiceInfoReady (66) | OwnerServiceInfoReady (67) |
//! | DeviceServiceInfo (68) | OwnerServiceInfo (69) |
//! | Done (70) | Done2 (71) |
//!
//! From SetupDevice (65) onwards every body travels inside the session
//! encryption envelope.

pub mod done;
pub mod get_ov_next_entry;
pub mod hello_device;
pub mod ov_next_entry;
pub mod prove_device;
pub mod prove_ov_hdr;
pub mod service_info;
pub mod service_info_ready;
pub mod setup_device;

pub use done::{Done, Done2};
pub use get_ov_next_entry::GetOvNextEntry;
pub use hello_device::HelloDevice;
pub use ov_next_entry::OvNextEntry;
pub use prove_device::ProveDevice;
pub use prove_ov_hdr::{ProveOvHdr, ProveOvHdrPayload};
pub use service_info::{DeviceServiceInfo, OwnerServiceInfo};
pub use service_info_ready::{DeviceServiceInfoReady, OwnerServiceInfoReady};
pub use setup_device::{SetupDevice, SetupDevicePayload};

/// Service-info message size assumed when a peer does not state one.
pub const DEFAULT_MAX_SERVICE_INFO_SIZE: u16 = 1300;

/// Most DeviceServiceInfo/OwnerServiceInfo exchanges one TO2 session may take.
pub const MAX_SERVICE_INFO_ROUNDS: usize = 255;
