//! Per-handshake session state.

use crate::error::{ConformanceError, ConformanceResult};
use async_trait::async_trait;
use fdo_crypto::envelope::{CipherSuite, SessionKey};
use fdo_crypto::hash::HashType;
use fdo_crypto::kex::{KexSuite, KeyExchange};
use fdo_protocol::{Cmd, Guid, Nonce, Protocol, ProtocolError};
use fdo_store::keyspace::{SESSION_TTL, session_key};
use fdo_store::{KvStore, StoreError, get_entity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Exported ephemeral key exchange state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKex {
    pub suite: KexSuite,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub secret: Vec<u8>,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub rand: Vec<u8>,
}

impl StoredKex {
    #[must_use]
    pub fn export(kex: &KeyExchange) -> Self {
        Self {
            suite: kex.suite(),
            secret: kex.secret_bytes().to_vec(),
            rand: kex.rand().to_vec(),
        }
    }

    /// # Errors
    /// Fails when the stored bytes no longer form a valid key.
    pub fn restore(&self) -> ConformanceResult<KeyExchange> {
        Ok(KeyExchange::restore(self.suite, &self.secret, &self.rand)?)
    }
}

/// Device service-info item held as its encoded CBOR value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredServiceInfo {
    pub key: String,
    #[serde(with = "fdo_cbor::hex_or_bytes_vec")]
    pub value: Vec<u8>,
}

/// Server-side state of one TO0, TO1 or TO2 handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub protocol: Protocol,
    /// Last request this session answered.
    pub prev_cmd: Cmd,
    /// Bumped on every stored update; guards against lost updates.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub guid: Option<Guid>,
    /// Listener instance recording results for this device, if any.
    #[serde(default)]
    pub listener: Option<Uuid>,

    /// TO0 `NonceTO0Sign` or TO1 `NonceTO1Proof`.
    #[serde(default)]
    pub nonce: Option<Nonce>,
    #[serde(default)]
    pub nonce_prove_ov: Option<Nonce>,
    #[serde(default)]
    pub nonce_prove_dv: Option<Nonce>,
    #[serde(default)]
    pub nonce_setup_dv: Option<Nonce>,

    #[serde(default)]
    pub kex: Option<StoredKex>,
    #[serde(default)]
    pub cipher_suite: Option<CipherSuite>,
    #[serde(default, with = "fdo_cbor::hex_or_bytes_vec::option")]
    pub session_key: Option<Vec<u8>>,
    #[serde(default)]
    pub hash_type: Option<HashType>,

    #[serde(default)]
    pub num_entries: u8,
    /// Entry indices the device asked for with GetOVNextEntry.
    #[serde(default)]
    pub requested_entries: Vec<u8>,

    #[serde(default)]
    pub max_device_service_info_size: Option<u16>,
    #[serde(default)]
    pub device_service_info: Vec<StoredServiceInfo>,
    #[serde(default)]
    pub device_service_info_done: bool,
    #[serde(default)]
    pub owner_sims_sent: usize,
    #[serde(default)]
    pub owner_done: bool,
    /// DeviceServiceInfo messages received so far.
    #[serde(default)]
    pub service_info_rounds: usize,
}

impl Session {
    /// Fresh session that has just answered the first message of `protocol`.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            prev_cmd: protocol.first_cmd(),
            revision: 0,
            guid: None,
            listener: None,
            nonce: None,
            nonce_prove_ov: None,
            nonce_prove_dv: None,
            nonce_setup_dv: None,
            kex: None,
            cipher_suite: None,
            session_key: None,
            hash_type: None,
            num_entries: 0,
            requested_entries: Vec::new(),
            max_device_service_info_size: None,
            device_service_info: Vec::new(),
            device_service_info_done: false,
            owner_sims_sent: 0,
            owner_done: false,
            service_info_rounds: 0,
        }
    }

    /// Reject `cmd` unless it may follow [`Self::prev_cmd`] in `protocol`.
    ///
    /// # Errors
    /// [`ProtocolError::BadSession`] for another protocol's session,
    /// [`ProtocolError::Sequence`] for an out-of-order message.
    pub fn expect(&self, cmd: Cmd) -> Result<(), ProtocolError> {
        if cmd.protocol() != Some(self.protocol) {
            return Err(ProtocolError::BadSession(format!(
                "{} session cannot take message {cmd}",
                self.protocol
            )));
        }
        let allowed = Cmd::allowed_after(self.prev_cmd);
        if allowed.contains(&cmd) {
            Ok(())
        } else {
            Err(ProtocolError::sequence(allowed, cmd))
        }
    }

    /// The stored session key.
    ///
    /// # Errors
    /// [`ProtocolError::BadSession`] before key exchange has completed.
    pub fn key(&self) -> Result<SessionKey, ProtocolError> {
        match (self.cipher_suite, &self.session_key) {
            (Some(suite), Some(material)) => Ok(SessionKey::from_material(suite, material)?),
            _ => Err(ProtocolError::BadSession(
                "session key not established".into(),
            )),
        }
    }

    /// A nonce the session must already hold.
    ///
    /// # Errors
    /// [`ProtocolError::BadSession`] when the step that sets it has not run.
    pub fn required(nonce: Option<Nonce>, what: &str) -> Result<Nonce, ProtocolError> {
        nonce.ok_or_else(|| ProtocolError::BadSession(format!("{what} not set")))
    }
}

/// Session persistence.
///
/// Sessions are only ever reclaimed by TTL expiry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return its opaque token.
    ///
    /// # Errors
    /// Store failures.
    async fn create(&self, session: &Session) -> ConformanceResult<String>;

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown or expired tokens.
    async fn get(&self, token: &str) -> ConformanceResult<Session>;

    /// Overwrite the session. `session.revision` must match the stored one.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] if the session expired meanwhile,
    /// [`ProtocolError::Sequence`] if another request updated it first.
    async fn update(&self, token: &str, session: &Session) -> ConformanceResult<Session>;
}

/// [`SessionStore`] over the shared key-value store.
pub struct KvSessionStore {
    kv: Arc<dyn KvStore>,
}

impl KvSessionStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

impl std::fmt::Debug for KvSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSessionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn create(&self, session: &Session) -> ConformanceResult<String> {
        let token = hex::encode(fdo_crypto::random_bytes::<16>());
        let bytes = fdo_cbor::to_vec(session)?;
        self.kv
            .set(&session_key(&token), bytes, Some(SESSION_TTL))
            .await?;
        debug!(protocol = %session.protocol, "session created");
        Ok(token)
    }

    async fn get(&self, token: &str) -> ConformanceResult<Session> {
        get_entity(self.kv.as_ref(), &session_key(token))
            .await?
            .ok_or_else(|| ConformanceError::not_found("session"))
    }

    async fn update(&self, token: &str, session: &Session) -> ConformanceResult<Session> {
        let mut next = session.clone();
        next.revision = session.revision.wrapping_add(1);
        let bytes = fdo_cbor::to_vec(&next)?;
        let expected = session.revision;
        let prev_cmd = session.prev_cmd;

        let result = self
            .kv
            .update(
                &session_key(token),
                Some(SESSION_TTL),
                Box::new(move |current| {
                    let Some(current) = current else {
                        return Err(StoreError::NotFound("session".into()));
                    };
                    let stored: Session = fdo_cbor::from_slice(current)?;
                    if stored.revision != expected {
                        return Err(StoreError::Conflict(format!(
                            "stale session revision {expected}, stored {}",
                            stored.revision
                        )));
                    }
                    Ok(bytes)
                }),
            )
            .await;

        match result {
            Ok(_) => Ok(next),
            Err(StoreError::NotFound(_)) => Err(ConformanceError::not_found("session")),
            Err(StoreError::Conflict(_)) => {
                Err(ProtocolError::sequence(Cmd::allowed_after(prev_cmd), prev_cmd).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_store::{ManualClock, MemoryKvStore, MemoryStoreConfig};

    fn store() -> (KvSessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let kv = MemoryKvStore::with_clock(MemoryStoreConfig::default(), clock.clone());
        (KvSessionStore::new(Arc::new(kv)), clock)
    }

    #[tokio::test]
    async fn create_get_update() {
        let (store, _) = store();
        let mut session = Session::new(Protocol::To2);
        session.guid = Some(Guid::random());
        let token = store.create(&session).await.unwrap();
        assert_eq!(token.len(), 32);

        let mut loaded = store.get(&token).await.unwrap();
        assert_eq!(loaded, session);
        loaded.prev_cmd = Cmd::To2GetOvNextEntry;
        let stored = store.update(&token, &loaded).await.unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(store.get(&token).await.unwrap().prev_cmd, Cmd::To2GetOvNextEntry);
    }

    #[tokio::test]
    async fn stale_update_is_rejected() {
        let (store, _) = store();
        let token = store.create(&Session::new(Protocol::To2)).await.unwrap();
        let a = store.get(&token).await.unwrap();
        let b = a.clone();
        store.update(&token, &a).await.unwrap();
        let err = store.update(&token, &b).await.unwrap_err();
        assert!(matches!(
            err,
            ConformanceError::Protocol(ProtocolError::Sequence { .. })
        ));
    }

    #[tokio::test]
    async fn sessions_expire_after_ten_minutes() {
        let (store, clock) = store();
        let token = store.create(&Session::new(Protocol::To1)).await.unwrap();
        clock.advance(chrono::Duration::minutes(9));
        let session = store.get(&token).await.unwrap();

        clock.advance(chrono::Duration::minutes(11));
        assert!(matches!(
            store.get(&token).await,
            Err(ConformanceError::NotFound(_))
        ));
        // an expired session is not resurrected by a late update
        assert!(matches!(
            store.update(&token, &session).await,
            Err(ConformanceError::NotFound(_))
        ));
    }

    #[test]
    fn ordering_follows_allowed_after() {
        let mut s = Session::new(Protocol::To2);
        assert!(s.expect(Cmd::To2GetOvNextEntry).is_ok());
        assert!(s.expect(Cmd::To2ProveDevice).is_ok());
        assert!(matches!(
            s.expect(Cmd::To2Done),
            Err(ProtocolError::Sequence { .. })
        ));
        assert!(matches!(
            s.expect(Cmd::To1ProveToRv),
            Err(ProtocolError::BadSession(_))
        ));
        s.prev_cmd = Cmd::To2DeviceServiceInfo;
        assert!(s.expect(Cmd::To2Done).is_ok());
    }
}
