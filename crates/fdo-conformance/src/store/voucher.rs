//! Seed vouchers and TO0 registrations.

use crate::error::{ConformanceError, ConformanceResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fdo_cbor::CborCodec;
use fdo_crypto::keys::Es256SigningKey;
use fdo_protocol::voucher::{DeviceCredential, GeneratedVoucher};
use fdo_protocol::{Guid, OwnershipVoucher};
use fdo_store::keyspace::{MAX_RV_REGISTRATION_TTL, rv_registration_key, voucher_key};
use fdo_store::{KvStore, get_entity, set_entity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A generated credential, its voucher and the final owner's private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRecord {
    pub guid: Guid,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub credential: Vec<u8>,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub voucher: Vec<u8>,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub owner_key: Vec<u8>,
}

impl VoucherRecord {
    /// # Errors
    /// Fails if the credential or voucher cannot be encoded.
    pub fn from_generated(generated: &GeneratedVoucher) -> ConformanceResult<Self> {
        Ok(Self {
            guid: generated.credential.guid,
            credential: generated.credential.to_bytes()?,
            voucher: generated.voucher.to_bytes()?,
            owner_key: generated.owner_key.to_bytes().to_vec(),
        })
    }

    /// # Errors
    /// Fails when a stored blob no longer decodes.
    pub fn to_generated(&self) -> ConformanceResult<GeneratedVoucher> {
        Ok(GeneratedVoucher {
            credential: DeviceCredential::from_bytes(&self.credential)?,
            voucher: OwnershipVoucher::from_bytes(&self.voucher)?,
            owner_key: Es256SigningKey::from_bytes(&self.owner_key)?,
        })
    }

    /// # Errors
    /// Fails when the stored voucher no longer decodes.
    pub fn ownership_voucher(&self) -> ConformanceResult<OwnershipVoucher> {
        Ok(OwnershipVoucher::from_bytes(&self.voucher)?)
    }
}

impl std::fmt::Debug for VoucherRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoucherRecord")
            .field("guid", &self.guid)
            .field("voucher_len", &self.voucher.len())
            .finish_non_exhaustive()
    }
}

/// Vouchers this tool owns, by device GUID.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// # Errors
    /// Store failures.
    async fn save(&self, record: &VoucherRecord) -> ConformanceResult<()>;

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown GUIDs.
    async fn get(&self, guid: &Guid) -> ConformanceResult<VoucherRecord>;
}

pub struct KvVoucherStore {
    kv: Arc<dyn KvStore>,
}

impl KvVoucherStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl VoucherStore for KvVoucherStore {
    async fn save(&self, record: &VoucherRecord) -> ConformanceResult<()> {
        Ok(set_entity(self.kv.as_ref(), &voucher_key(record.guid.as_bytes()), record, None).await?)
    }

    async fn get(&self, guid: &Guid) -> ConformanceResult<VoucherRecord> {
        get_entity(self.kv.as_ref(), &voucher_key(guid.as_bytes()))
            .await?
            .ok_or_else(|| ConformanceError::not_found(format!("voucher {guid}")))
    }
}

/// What an owner registered with the rendezvous role in TO0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RvRegistration {
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub to0d: Vec<u8>,
    /// Encoded `to1d` Sign1, served back verbatim as RVRedirect.
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub to1d: Vec<u8>,
    pub wait_seconds: u32,
    pub registered_at: DateTime<Utc>,
}

impl RvRegistration {
    /// Lifetime actually granted for a requested wait.
    #[must_use]
    pub fn granted_wait(requested: u32) -> u32 {
        let max = u32::try_from(MAX_RV_REGISTRATION_TTL.num_seconds()).unwrap_or(u32::MAX);
        requested.min(max)
    }
}

#[async_trait]
pub trait RvRegistrationStore: Send + Sync {
    /// Store under the device GUID, expiring after `wait_seconds`.
    ///
    /// # Errors
    /// Store failures.
    async fn register(&self, guid: &Guid, registration: &RvRegistration) -> ConformanceResult<()>;

    /// # Errors
    /// [`ConformanceError::NotFound`] when no live registration exists.
    async fn lookup(&self, guid: &Guid) -> ConformanceResult<RvRegistration>;
}

pub struct KvRvRegistrationStore {
    kv: Arc<dyn KvStore>,
}

impl KvRvRegistrationStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl RvRegistrationStore for KvRvRegistrationStore {
    async fn register(&self, guid: &Guid, registration: &RvRegistration) -> ConformanceResult<()> {
        let ttl = Duration::seconds(i64::from(RvRegistration::granted_wait(
            registration.wait_seconds,
        )));
        Ok(set_entity(
            self.kv.as_ref(),
            &rv_registration_key(guid.as_bytes()),
            registration,
            Some(ttl),
        )
        .await?)
    }

    async fn lookup(&self, guid: &Guid) -> ConformanceResult<RvRegistration> {
        get_entity(self.kv.as_ref(), &rv_registration_key(guid.as_bytes()))
            .await?
            .ok_or_else(|| ConformanceError::not_found(format!("rendezvous registration {guid}")))
    }
}
