//! The storage contract consumed by the conformance engine.

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::Duration;
use fdo_cbor::{from_slice, to_vec};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: Vec<u8>,
    },
}

/// Writes applied all-or-nothing by [`KvStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) -> &mut Self {
        self.ops.push(WriteOp::Set { key, value, ttl });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Read-modify-write callback for [`KvStore::update`].
///
/// Receives the current value (if live) and returns the value to store.
pub type UpdateFn<'a> = dyn FnOnce(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send + 'a;

/// Transactional key-value store with TTL eviction and prefix iteration.
///
/// Expired entries are invisible to every read. Writes to one key are
/// serialized; there are no multi-key locks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the live value under `key`.
    ///
    /// # Errors
    /// Returns a backend error if the store cannot be read.
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value`, replacing any previous value and TTL.
    ///
    /// # Errors
    /// Returns [`crate::StoreError::Full`] when the store is at capacity.
    async fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove `key`. Returns whether a live value was present.
    ///
    /// # Errors
    /// Returns a backend error if the store cannot be written.
    async fn delete(&self, key: &[u8]) -> StoreResult<bool>;

    /// All live entries whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    /// Returns a backend error if the store cannot be read.
    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every write in `batch` atomically.
    ///
    /// # Errors
    /// Nothing is written when an error is returned.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Atomic read-modify-write of a single key.
    ///
    /// # Errors
    /// Propagates the callback's error, leaving the stored value untouched.
    async fn update(
        &self,
        key: &[u8],
        ttl: Option<Duration>,
        f: Box<UpdateFn<'_>>,
    ) -> StoreResult<Vec<u8>>;
}

/// Decode the CBOR entity stored under `key`.
///
/// # Errors
/// Store errors, or [`crate::StoreError::Serialization`] for a corrupt blob.
pub async fn get_entity<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &[u8],
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode `entity` as CBOR and store it under `key`.
///
/// # Errors
/// Store errors, or [`crate::StoreError::Serialization`] if encoding fails.
pub async fn set_entity<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &[u8],
    entity: &T,
    ttl: Option<Duration>,
) -> StoreResult<()> {
    store.set(key, to_vec(entity)?, ttl).await
}
