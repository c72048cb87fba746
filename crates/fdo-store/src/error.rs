//! Error types for FDO stores.

use fdo_cbor::SerializationError;
use thiserror::Error;

/// Errors for key-value store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent or its TTL has elapsed.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The in-memory store is full.
    #[error("store full: {entries} / {max} entries")]
    Full { entries: usize, max: usize },

    /// A stored blob did not decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// An update callback refused the stored value.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The storage backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// `NotFound` for a raw key, rendered printable.
    #[must_use]
    pub fn not_found(key: &[u8]) -> Self {
        Self::NotFound(crate::keyspace::display_key(key))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
