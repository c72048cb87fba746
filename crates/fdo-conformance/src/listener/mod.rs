//! Scripted server: a device under test drives this tool.
//!
//! [`Listener::handle`] plays the rendezvous role for TO0/TO1 and the owner
//! role for TO2. When the device has a listener instance, each request is
//! first offered to that instance's runner, which may pick a fault identity
//! to serve in place of the correct reply. Devices without an instance are
//! served normally and nothing is recorded.

mod owner;
mod router;
mod rv;

pub use router::{router, serve};

use crate::error::{ConformanceError, ConformanceResult};
use crate::matcher::TestOutcome;
use crate::registry::TestId;
use crate::store::{ListenerInstance, Session, Stores, VoucherRecord};
use fdo_cbor::CborCodec;
use fdo_protocol::to1::HelloRv;
use fdo_protocol::to2::{DEFAULT_MAX_SERVICE_INFO_SIZE, HelloDevice};
use fdo_protocol::types::ServiceInfoKv;
use fdo_protocol::voucher::GeneratedVoucher;
use fdo_protocol::{Cmd, Guid, Protocol, ProtocolError, ProtocolResult};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Owner-role tunables.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Announced in OwnerServiceInfoReady and enforced on DeviceServiceInfo.
    pub max_device_service_info_size: u16,
    /// Sent to the device one per OwnerServiceInfo.
    pub owner_sims: Vec<ServiceInfoKv>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_device_service_info_size: DEFAULT_MAX_SERVICE_INFO_SIZE,
            owner_sims: Vec::new(),
        }
    }
}

/// A successful reply, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub cmd: Cmd,
    /// Bearer token to return in `Authorization`.
    pub token: Option<String>,
    pub body: Vec<u8>,
}

/// One handled request before it is persisted.
struct Handled {
    session: Session,
    reply: Cmd,
    body: Vec<u8>,
    send_token: bool,
    /// False while a looping exchange is still open.
    finished: bool,
    /// Outcomes for identities other than the one served.
    records: Vec<(TestId, TestOutcome)>,
}

impl Handled {
    fn new(session: Session, reply: Cmd, body: Vec<u8>) -> Self {
        Self {
            session,
            reply,
            body,
            send_token: true,
            finished: true,
            records: Vec::new(),
        }
    }
}

/// The session a non-initial handler runs in.
fn in_session(session: Option<Session>) -> ConformanceResult<Session> {
    session.ok_or_else(|| ProtocolError::BadSession("no session for this message".into()).into())
}

/// Device GUID named by a session-opening request, if it decodes.
fn initial_guid(cmd: Cmd, body: &[u8]) -> Option<Guid> {
    match cmd {
        Cmd::To1HelloRv => HelloRv::from_bytes(body).ok().map(|m| m.guid),
        Cmd::To2HelloDevice => HelloDevice::from_bytes(body).ok().map(|m| m.guid),
        _ => None,
    }
}

/// Rendezvous and owner server over the shared stores.
#[derive(Debug, Clone)]
pub struct Listener {
    stores: Stores,
    config: Arc<ListenerConfig>,
}

impl Listener {
    #[must_use]
    pub fn new(stores: Stores, config: ListenerConfig) -> Self {
        Self {
            stores,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Store a device's voucher so the owner role can serve it, and open a
    /// listener instance that records the device's conformance results.
    ///
    /// # Errors
    /// Store failures.
    pub async fn register_device(&self, generated: &GeneratedVoucher) -> ConformanceResult<ListenerInstance> {
        let record = VoucherRecord::from_generated(generated)?;
        self.stores.vouchers.save(&record).await?;
        let instance = ListenerInstance::new(record);
        self.stores.listeners.save(&instance).await?;
        info!(listener = %instance.id, guid = %instance.guid, "listener instance created");
        Ok(instance)
    }

    /// Handle one request and produce the reply or the error to send.
    ///
    /// # Errors
    /// Any [`ProtocolError`]; the router renders it as an error message.
    #[instrument(skip(self, token, body), fields(cmd = %cmd, len = body.len()))]
    pub async fn handle(&self, cmd: Cmd, token: Option<&str>, body: &[u8]) -> ProtocolResult<Reply> {
        let protocol = cmd
            .protocol()
            .filter(|_| cmd.reply().is_some())
            .ok_or_else(|| ProtocolError::Decode(format!("message {cmd} is not a request")))?;

        let existing = if cmd.starts_session() {
            None
        } else {
            let token = token.ok_or_else(|| {
                ProtocolError::BadSession(format!("message {cmd} needs an Authorization bearer"))
            })?;
            let session = self
                .stores
                .sessions
                .get(token)
                .await
                .map_err(ConformanceError::into_protocol)?;
            session.expect(cmd)?;
            Some((token, session))
        };

        let mut instance = self
            .instance_for(cmd, existing.as_ref().map(|(_, s)| s), body)
            .await;
        let fault = instance
            .as_mut()
            .and_then(|i| i.runner_mut(protocol))
            .and_then(|r| r.begin(cmd));

        let session = existing.as_ref().map(|(_, s)| s.clone());
        let result = match protocol {
            Protocol::To0 | Protocol::To1 => self.rendezvous(cmd, session, body, fault).await,
            Protocol::To2 => self.owner(cmd, session, body, fault).await,
        };

        if let Some(instance) = instance.as_mut() {
            if let Some(runner) = instance.runner_mut(protocol) {
                match &result {
                    Ok(handled) => {
                        for (id, outcome) in &handled.records {
                            runner.record(*id, outcome.clone());
                        }
                        if handled.finished && fault.is_some_and(TestId::is_positive) {
                            runner.complete(cmd);
                        }
                    }
                    Err(err) if fault.is_some() => runner.fail(err.to_string()),
                    Err(_) => {}
                }
            }
            if let Err(err) = self.stores.listeners.update(instance).await {
                warn!(listener = %instance.id, error = %err, "listener state not saved");
            }
        }

        let mut handled = result.map_err(ConformanceError::into_protocol)?;
        handled.session.prev_cmd = cmd;
        handled.session.listener = instance.as_ref().map(|i| i.id);
        let token = match existing {
            None => self.stores.sessions.create(&handled.session).await,
            Some((token, _)) => self
                .stores
                .sessions
                .update(token, &handled.session)
                .await
                .map(|_| token.to_owned()),
        }
        .map_err(ConformanceError::into_protocol)?;

        Ok(Reply {
            cmd: handled.reply,
            token: handled.send_token.then_some(token),
            body: handled.body,
        })
    }

    async fn instance_for(
        &self,
        cmd: Cmd,
        session: Option<&Session>,
        body: &[u8],
    ) -> Option<ListenerInstance> {
        let found = match session {
            Some(session) => match session.listener {
                Some(id) => self.stores.listeners.get(&id).await.map(Some),
                None => return None,
            },
            None => {
                let guid = initial_guid(cmd, body)?;
                self.stores.listeners.get_by_guid(&guid).await
            }
        };
        found.unwrap_or_else(|err| {
            warn!(cmd = %cmd, error = %err, "listener instance lookup failed");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::listener_tests;
    use fdo_protocol::types::{RendezvousInfo, SigInfo};
    use fdo_protocol::voucher::VoucherBuilder;
    use fdo_protocol::FdoErrorCode;
    use fdo_store::{MemoryKvStore, MemoryStoreConfig};

    fn listener() -> Listener {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        Listener::new(Stores::over(kv), ListenerConfig::default())
    }

    fn generated() -> GeneratedVoucher {
        VoucherBuilder::new(RendezvousInfo::from_urls(&["http://rv.example"]).unwrap())
            .entry_count(2)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn non_initial_message_needs_a_bearer() {
        let err = listener()
            .handle(Cmd::To2GetOvNextEntry, None, &[0x81, 0x00])
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);
        assert_eq!(err.error_code(), FdoErrorCode::MessageBodyError);
    }

    #[tokio::test]
    async fn unknown_session_is_resource_not_found() {
        let err = listener()
            .handle(Cmd::To2GetOvNextEntry, Some("feedface"), &[0x81, 0x00])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::ResourceNotFound);
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn replies_are_not_requests() {
        let err = listener()
            .handle(Cmd::To2ProveOvHdr, None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::MessageBodyError);
    }

    #[tokio::test]
    async fn out_of_order_message_leaves_the_session_alone() {
        let listener = listener();
        let g = generated();
        listener.stores().vouchers.save(&VoucherRecord::from_generated(&g).unwrap()).await.unwrap();
        let hello = HelloDevice::new(
            g.credential.guid,
            fdo_crypto::kex::KexSuite::Ecdh256,
            fdo_crypto::envelope::CipherSuite::A128Gcm,
            SigInfo::es256(),
        );
        let reply = listener
            .handle(Cmd::To2HelloDevice, None, &hello.to_bytes().unwrap())
            .await
            .unwrap();
        let token = reply.token.unwrap();
        let before = listener.stores().sessions.get(&token).await.unwrap();

        let err = listener
            .handle(Cmd::To2Done, Some(&token), &[0x80])
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Sequence { .. }), "{err}");
        let after = listener.stores().sessions.get(&token).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn device_without_instance_records_nothing() {
        let listener = listener();
        let g = generated();
        listener.stores().vouchers.save(&VoucherRecord::from_generated(&g).unwrap()).await.unwrap();
        let hello = HelloDevice::new(
            g.credential.guid,
            fdo_crypto::kex::KexSuite::Ecdh256,
            fdo_crypto::envelope::CipherSuite::A128Gcm,
            SigInfo::es256(),
        );
        let reply = listener
            .handle(Cmd::To2HelloDevice, None, &hello.to_bytes().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.cmd, Cmd::To2ProveOvHdr);
        assert!(
            listener
                .stores()
                .listeners
                .get_by_guid(&g.credential.guid)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn registered_device_is_served_its_fault_queue() {
        let listener = listener();
        let g = generated();
        let instance = listener.register_device(&g).await.unwrap();
        let hello = HelloDevice::new(
            g.credential.guid,
            fdo_crypto::kex::KexSuite::Ecdh256,
            fdo_crypto::envelope::CipherSuite::A128Gcm,
            SigInfo::es256(),
        );

        listener
            .handle(Cmd::To2HelloDevice, None, &hello.to_bytes().unwrap())
            .await
            .unwrap();
        let stored = listener.stores().listeners.get(&instance.id).await.unwrap();
        assert_eq!(stored.to2.last_test_id, listener_tests(Cmd::To2HelloDevice).first().copied());
        assert_eq!(stored.to2.pending, stored.to2.last_test_id);
    }

    #[tokio::test]
    async fn hello_rv_for_unregistered_device_is_not_found() {
        let listener = listener();
        let hello = HelloRv {
            guid: Guid::random(),
            ea_sig_info: SigInfo::es256(),
        };
        let err = listener
            .handle(Cmd::To1HelloRv, None, &hello.to_bytes().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::ResourceNotFound);
    }
}
