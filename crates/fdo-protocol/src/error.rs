//! Protocol error taxonomy and the FDO error message (255).

use crate::cmd::Cmd;
use fdo_cbor::value::{self, tstr, uint};
use fdo_cbor::{CborCodec, SerializationError, SerializationResult, Value};
use fdo_crypto::CryptoError;
use thiserror::Error;

/// Error codes carried in an FDO error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdoErrorCode {
    InvalidJwtToken,
    InvalidOwnershipVoucher,
    InvalidOwnerSignBody,
    InvalidIpAddress,
    InvalidGuid,
    ResourceNotFound,
    MessageBodyError,
    InvalidMessageError,
    CredReuseError,
    InternalServerError,
}

impl FdoErrorCode {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::InvalidJwtToken => 1,
            Self::InvalidOwnershipVoucher => 2,
            Self::InvalidOwnerSignBody => 3,
            Self::InvalidIpAddress => 4,
            Self::InvalidGuid => 5,
            Self::ResourceNotFound => 6,
            Self::MessageBodyError => 100,
            Self::InvalidMessageError => 101,
            Self::CredReuseError => 102,
            Self::InternalServerError => 500,
        }
    }

    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::InvalidJwtToken,
            2 => Self::InvalidOwnershipVoucher,
            3 => Self::InvalidOwnerSignBody,
            4 => Self::InvalidIpAddress,
            5 => Self::InvalidGuid,
            6 => Self::ResourceNotFound,
            100 => Self::MessageBodyError,
            101 => Self::InvalidMessageError,
            102 => Self::CredReuseError,
            500 => Self::InternalServerError,
            _ => return None,
        })
    }
}

impl std::fmt::Display for FdoErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Externally observable failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed body.
    Decode,
    /// Message out of order for the session, or no usable session.
    Sequence,
    /// Signature, HMAC, hash chain or decryption check failed.
    Verification,
    /// Unknown voucher, GUID or session.
    NotFound,
    /// Unknown cipher or key exchange suite.
    Unsupported,
    /// Storage or primitive failure unrelated to peer input.
    Internal,
}

impl ErrorCategory {
    /// The code a server answers with for this class.
    #[must_use]
    pub const fn error_code(self) -> FdoErrorCode {
        match self {
            Self::Decode | Self::Sequence | Self::Unsupported => FdoErrorCode::MessageBodyError,
            Self::Verification => FdoErrorCode::InvalidMessageError,
            Self::NotFound => FdoErrorCode::ResourceNotFound,
            Self::Internal => FdoErrorCode::InternalServerError,
        }
    }

    /// Best-effort classification of a code received from a peer.
    #[must_use]
    pub const fn from_error_code(code: FdoErrorCode) -> Self {
        match code {
            FdoErrorCode::InvalidJwtToken => Self::Sequence,
            FdoErrorCode::InvalidOwnershipVoucher
            | FdoErrorCode::InvalidOwnerSignBody
            | FdoErrorCode::InvalidMessageError
            | FdoErrorCode::CredReuseError => Self::Verification,
            FdoErrorCode::InvalidIpAddress | FdoErrorCode::MessageBodyError => Self::Decode,
            FdoErrorCode::InvalidGuid | FdoErrorCode::ResourceNotFound => Self::NotFound,
            FdoErrorCode::InternalServerError => Self::Internal,
        }
    }
}

/// FDO error message `[code, prevMsgId, errorStr, timestamp, correlationId]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Raw code; peers may send codes outside [`FdoErrorCode`].
    pub code: u16,
    pub prev_msg_id: u8,
    pub error_str: String,
    pub timestamp: Option<u64>,
    pub correlation_id: Option<u64>,
}

impl ErrorMessage {
    #[must_use]
    pub fn new(code: FdoErrorCode, prev: Cmd, error_str: impl Into<String>) -> Self {
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).ok();
        Self {
            code: code.code(),
            prev_msg_id: prev.number(),
            error_str: error_str.into(),
            timestamp,
            correlation_id: Some(rand::random::<u32>().into()),
        }
    }

    #[must_use]
    pub const fn error_code(&self) -> Option<FdoErrorCode> {
        FdoErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FDO error {} after {}: {}",
            self.code, self.prev_msg_id, self.error_str
        )
    }
}

fn optional_u64(v: Value, what: &'static str) -> SerializationResult<Option<u64>> {
    match v {
        Value::Null => Ok(None),
        // timestamps are sometimes sent as text or tagged dates; keep only integers
        Value::Integer(_) => value::int(&v, what).map(Some),
        Value::Tag(_, inner) => optional_u64(*inner, what),
        _ => Ok(None),
    }
}

impl CborCodec for ErrorMessage {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            uint(self.code.into()),
            uint(self.prev_msg_id.into()),
            tstr(self.error_str.clone()),
            self.timestamp.map_or(Value::Null, uint),
            self.correlation_id.map_or(Value::Null, uint),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [code, prev, error_str, timestamp, correlation_id] = value::fields(v, "ErrorMessage")?;
        Ok(Self {
            code: value::int(&code, "ErrorMessage.code")?,
            prev_msg_id: value::int(&prev, "ErrorMessage.prevMsgId")?,
            error_str: value::text(error_str, "ErrorMessage.errorStr")?,
            timestamp: optional_u64(timestamp, "ErrorMessage.timestamp")?,
            correlation_id: optional_u64(correlation_id, "ErrorMessage.correlationId")?,
        })
    }
}

/// Errors raised while producing or consuming FDO messages.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Malformed body.
    #[error("malformed message: {0}")]
    Decode(String),

    /// Message type not allowed at this point of the session.
    #[error("unexpected message {received}, expected one of {expected:?}")]
    Sequence { expected: Vec<u8>, received: u8 },

    /// Missing, invalid or wrong-protocol session token.
    #[error("bad session: {0}")]
    BadSession(String),

    /// A cryptographic check failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Unknown voucher, GUID or session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unknown or unimplemented algorithm.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Local failure unrelated to peer input.
    #[error("internal error: {0}")]
    Internal(String),

    /// The HTTP exchange itself failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer answered with an FDO error message.
    #[error("peer returned HTTP {status}: {message}")]
    Remote { status: u16, message: ErrorMessage },
}

impl ProtocolError {
    #[must_use]
    pub fn sequence(expected: &[Cmd], received: Cmd) -> Self {
        Self::Sequence {
            expected: expected.iter().map(|c| c.number()).collect(),
            received: received.number(),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Decode,
            Self::Sequence { .. } | Self::BadSession(_) => ErrorCategory::Sequence,
            Self::Verification(_) => ErrorCategory::Verification,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Unsupported(_) => ErrorCategory::Unsupported,
            Self::Internal(_) | Self::Transport(_) => ErrorCategory::Internal,
            Self::Remote { message, .. } => message
                .error_code()
                .map_or(ErrorCategory::Internal, ErrorCategory::from_error_code),
        }
    }

    /// Code to put in the error message sent to the peer.
    #[must_use]
    pub fn error_code(&self) -> FdoErrorCode {
        match self {
            Self::Remote { message, .. } => message
                .error_code()
                .unwrap_or(FdoErrorCode::InternalServerError),
            other => other.category().error_code(),
        }
    }

    /// HTTP status to answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadSession(_) => 401,
            Self::Internal(_) | Self::Transport(_) => 500,
            Self::Remote { status, .. } => *status,
            _ => 400,
        }
    }

    /// Render as the error message a server sends back.
    #[must_use]
    pub fn to_error_message(&self, prev: Cmd) -> ErrorMessage {
        match self {
            Self::Remote { message, .. } => message.clone(),
            other => ErrorMessage::new(other.error_code(), prev, other.to_string()),
        }
    }
}

impl From<SerializationError> for ProtocolError {
    fn from(err: SerializationError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<CryptoError> for ProtocolError {
    fn from(err: CryptoError) -> Self {
        match err {
            e if e.is_verification_failure() => Self::Verification(e.to_string()),
            e @ CryptoError::Unsupported { .. } => Self::Unsupported(e.to_string()),
            e @ (CryptoError::EncryptFailed | CryptoError::InvalidSecretKey) => {
                Self::Internal(e.to_string())
            }
            e => Self::Decode(e.to_string()),
        }
    }
}

/// Result alias for this crate.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_codes_and_statuses() {
        let cases = [
            (ProtocolError::Decode("x".into()), 100, 400),
            (ProtocolError::sequence(&[Cmd::To2ProveDevice], Cmd::To2Done), 100, 400),
            (ProtocolError::BadSession("x".into()), 100, 401),
            (ProtocolError::Verification("x".into()), 101, 400),
            (ProtocolError::NotFound("x".into()), 6, 400),
            (ProtocolError::Unsupported("x".into()), 100, 400),
            (ProtocolError::Internal("x".into()), 500, 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.error_code().code(), code, "{err}");
            assert_eq!(err.http_status(), status, "{err}");
        }
    }

    #[test]
    fn crypto_errors_keep_their_category() {
        let e: ProtocolError = CryptoError::SignatureVerificationFailed.into();
        assert_eq!(e.category(), ErrorCategory::Verification);
        let e: ProtocolError = CryptoError::DecryptFailed("mac tag mismatch").into();
        assert_eq!(e.category(), ErrorCategory::Verification);
        let e: ProtocolError = CryptoError::Unsupported {
            kind: "key exchange suite",
            value: "ECDH384".into(),
        }
        .into();
        assert_eq!(e.category(), ErrorCategory::Unsupported);
        let e: ProtocolError = CryptoError::InvalidPublicKey.into();
        assert_eq!(e.category(), ErrorCategory::Decode);
    }

    #[test]
    fn error_message_wire_form() {
        let msg = ProtocolError::NotFound("guid".into()).to_error_message(Cmd::To1HelloRv);
        assert_eq!(msg.code, 6);
        assert_eq!(msg.prev_msg_id, 30);
        let back = ErrorMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn error_message_tolerates_odd_timestamps() {
        let v = Value::Array(vec![
            uint(101),
            uint(64),
            tstr("bad sig"),
            tstr("2024-01-01T00:00:00Z"),
            Value::Null,
        ]);
        let msg = ErrorMessage::from_value(v).unwrap();
        assert_eq!(msg.error_code(), Some(FdoErrorCode::InvalidMessageError));
        assert_eq!(msg.timestamp, None);
    }

    #[test]
    fn remote_errors_classify_by_code() {
        let message = ErrorMessage::new(FdoErrorCode::ResourceNotFound, Cmd::To1HelloRv, "no");
        let err = ProtocolError::Remote {
            status: 400,
            message,
        };
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.error_code(), FdoErrorCode::ResourceNotFound);
    }
}
