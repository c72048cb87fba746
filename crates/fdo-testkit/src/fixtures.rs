//! Test fixtures for FDO conformance types.

use fdo_conformance::Stores;
use fdo_protocol::types::RendezvousInfo;
use fdo_protocol::voucher::{GeneratedVoucher, VoucherBuilder};
use fdo_store::{ManualClock, MemoryKvStore, MemoryStoreConfig};
use std::sync::Arc;

/// Rendezvous URL written into fixture vouchers.
pub const RV_URL: &str = "http://rv.example";

/// A fresh device credential and voucher with `entries` owner entries.
///
/// # Panics
/// If voucher generation fails, which only happens on a broken build.
#[must_use]
pub fn voucher(entries: usize) -> GeneratedVoucher {
    VoucherBuilder::new(RendezvousInfo::from_urls(&[RV_URL]).expect("fixture rendezvous URL"))
        .entry_count(entries)
        .build()
        .expect("fixture voucher")
}

/// Stores over a fresh in-memory backend on the system clock.
#[must_use]
pub fn memory_stores() -> Stores {
    Stores::over(Arc::new(MemoryKvStore::new(MemoryStoreConfig::default())))
}

/// Stores whose TTLs follow `clock`.
#[must_use]
pub fn stores_with_clock(clock: Arc<ManualClock>) -> Stores {
    Stores::over(Arc::new(MemoryKvStore::with_clock(
        MemoryStoreConfig::default(),
        clock,
    )))
}

/// A clock starting now, shared with [`stores_with_clock`].
#[must_use]
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(chrono::Utc::now()))
}
