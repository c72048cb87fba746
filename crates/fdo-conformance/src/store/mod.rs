//! Persistence for conformance state.
//!
//! Protocol logic only sees the traits here; [`Stores::over`] wires every one
//! of them to a single shared [`KvStore`].

pub mod listener;
pub mod results;
pub mod session;
pub mod voucher;

pub use listener::{KvListenerStore, ListenerInstance, ListenerRunner, ListenerStore};
pub use results::{Campaign, KvTestResultStore, TestResultStore, TestRun};
pub use session::{KvSessionStore, Session, SessionStore, StoredKex, StoredServiceInfo};
pub use voucher::{
    KvRvRegistrationStore, KvVoucherStore, RvRegistration, RvRegistrationStore, VoucherRecord,
    VoucherStore,
};

use fdo_store::KvStore;
use std::sync::Arc;

/// Every store the engine uses.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub vouchers: Arc<dyn VoucherStore>,
    pub registrations: Arc<dyn RvRegistrationStore>,
    pub results: Arc<dyn TestResultStore>,
    pub listeners: Arc<dyn ListenerStore>,
}

impl Stores {
    /// All stores backed by one key-value store.
    #[must_use]
    pub fn over(kv: Arc<dyn KvStore>) -> Self {
        Self {
            sessions: Arc::new(KvSessionStore::new(kv.clone())),
            vouchers: Arc::new(KvVoucherStore::new(kv.clone())),
            registrations: Arc::new(KvRvRegistrationStore::new(kv.clone())),
            results: Arc::new(KvTestResultStore::new(kv.clone())),
            listeners: Arc::new(KvListenerStore::new(kv)),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
