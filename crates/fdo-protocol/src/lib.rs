//! FDO 1.01 protocol model.
//!
//! Message numbering, the error message and error taxonomy, core types,
//! the ownership voucher (verification and generation), per-message codecs
//! for TO0, TO1 and TO2, and the HTTP client used to reach an implementation
//! under test.
//!
//! Messages are positional CBOR arrays and implement [`fdo_cbor::CborCodec`]:
//!
//! ```
//! use fdo_cbor::CborCodec;
//! use fdo_protocol::to2::Done;
//! use fdo_protocol::types::Nonce;
//!
//! let done = Done { nonce_prove_dv: Nonce::random() };
//! let bytes = done.to_bytes().unwrap();
//! assert_eq!(Done::from_bytes(&bytes).unwrap(), done);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cmd;
pub mod devmod;
pub mod eat;
pub mod error;
pub mod to0;
pub mod to1;
pub mod to2;
pub mod transport;
pub mod types;
pub mod voucher;

pub use cmd::{Cmd, Protocol};
pub use error::{ErrorCategory, ErrorMessage, FdoErrorCode, ProtocolError, ProtocolResult};
pub use types::{Guid, Nonce};
pub use voucher::{OwnershipVoucher, PROTOCOL_VERSION};
