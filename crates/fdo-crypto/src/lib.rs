//! Cryptographic building blocks for FDO onboarding.
//!
//! # Modules
//!
//! - [`hash`] - SHA-2 digests and HMACs tagged with their FDO hash type
//! - [`keys`] - ES256 signing keys and the FDO public key encoding
//! - [`cose`] - `COSE_Sign1` sign/verify and the FDO unprotected header labels
//! - [`kex`] - ECDH key exchange parameter blobs
//! - [`kdf`] - SP800-108 counter-mode KDF used to derive session keys
//! - [`envelope`] - session encryption envelopes (AES-GCM, and AES-CBC/CTR with HMAC)
//!
//! # Example: key exchange and encrypted round trip
//!
//! ```rust
//! use fdo_crypto::envelope::{CipherSuite, add_encryption_wrapping, remove_encryption_wrapping};
//! use fdo_crypto::kex::{KeyExchange, KexRole, KexSuite};
//!
//! let owner = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
//! let device = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
//! let xa = owner.public_param();
//! let xb = device.public_param();
//!
//! let owner_key = owner.derive_session_key(&xb, KexRole::Owner, CipherSuite::A128Gcm).unwrap();
//! let device_key = device.derive_session_key(&xa, KexRole::Device, CipherSuite::A128Gcm).unwrap();
//!
//! let sealed = add_encryption_wrapping(b"done", &device_key).unwrap();
//! assert_eq!(remove_encryption_wrapping(&sealed, &owner_key).unwrap(), b"done");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cose;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod kex;
pub mod keys;

pub use error::{CryptoError, CryptoResult};

/// Fill a fixed array from the OS RNG.
#[must_use]
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut out);
    out
}

/// Fill a vector of `len` bytes from the OS RNG.
#[must_use]
pub fn random_vec(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut out);
    out
}
