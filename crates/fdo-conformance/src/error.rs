//! Error types for the conformance engine.

use fdo_cbor::SerializationError;
use fdo_protocol::ProtocolError;
use fdo_store::StoreError;
use thiserror::Error;

/// Errors raised while running or recording conformance tests.
#[derive(Debug, Error)]
pub enum ConformanceError {
    /// A protocol step failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A stored record did not decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Unknown campaign, listener, session, voucher or run.
    #[error("not found: {0}")]
    NotFound(String),

    /// A requestor step was called out of order.
    #[error("requestor at {state} cannot run {step}")]
    OutOfOrder {
        state: &'static str,
        step: &'static str,
    },

    /// The service-info exchange never completed.
    #[error("service info exchange did not finish within {rounds} rounds")]
    RoundLimit { rounds: usize },

    /// Invalid configuration or input.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl ConformanceError {
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Listener-side view: the protocol error to answer the peer with.
    #[must_use]
    pub fn into_protocol(self) -> ProtocolError {
        match self {
            Self::Protocol(e) => e,
            Self::NotFound(what) => ProtocolError::NotFound(what),
            Self::Serialization(e) => ProtocolError::Decode(e.to_string()),
            other => ProtocolError::Internal(other.to_string()),
        }
    }
}

impl From<fdo_crypto::CryptoError> for ConformanceError {
    fn from(err: fdo_crypto::CryptoError) -> Self {
        Self::Protocol(err.into())
    }
}

/// Result alias for this crate.
pub type ConformanceResult<T> = Result<T, ConformanceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_protocol::FdoErrorCode;

    #[test]
    fn listener_view_keeps_the_taxonomy() {
        let e = ConformanceError::not_found("session abc").into_protocol();
        assert_eq!(e.error_code(), FdoErrorCode::ResourceNotFound);

        let e = ConformanceError::Store(StoreError::Backend("disk".into())).into_protocol();
        assert_eq!(e.error_code(), FdoErrorCode::InternalServerError);
        assert_eq!(e.http_status(), 500);
    }
}
