//! Error types for FDO cryptographic operations.

use fdo_cbor::SerializationError;
use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes.
        expected: usize,
        /// Actual key length provided.
        actual: usize,
    },

    /// Signature did not verify.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// HMAC or digest did not match the data.
    #[error("{what} mismatch")]
    DigestMismatch { what: &'static str },

    /// An algorithm identifier is known to the protocol but not implemented,
    /// or not known at all.
    #[error("unsupported {kind}: {value}")]
    Unsupported { kind: &'static str, value: String },

    /// Public key bytes could not be parsed.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Secret key bytes could not be parsed.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Key exchange parameter blob is malformed.
    #[error("invalid key exchange parameter: {0}")]
    InvalidKeyExchange(String),

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptFailed,

    /// Decryption failed (authentication, padding or framing).
    #[error("decryption failed: {0}")]
    DecryptFailed(&'static str),

    /// COSE structure could not be built or parsed.
    #[error("COSE operation failed: {0}")]
    CoseFailed(String),

    /// CBOR framing error.
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl CryptoError {
    pub(crate) fn unsupported(kind: &'static str, value: impl ToString) -> Self {
        Self::Unsupported {
            kind,
            value: value.to_string(),
        }
    }

    /// Whether this failure comes from attacker-controllable input failing a
    /// cryptographic check (as opposed to an unsupported parameter or framing).
    #[must_use]
    pub const fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerificationFailed
                | Self::DigestMismatch { .. }
                | Self::DecryptFailed(_)
        )
    }
}

/// Result type alias for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
