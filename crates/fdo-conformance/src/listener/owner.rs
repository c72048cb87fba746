//! Owner role: the server half of TO2.

use super::rv::verify_device;
use super::{Handled, Listener, in_session};
use crate::error::{ConformanceError, ConformanceResult};
use crate::fuzz::{
    fuzz_cose_sign1, fuzz_encryption_wrapping, fuzz_signature, random_buffer_fuzz,
    random_hash_fault, random_public_key_fault, random_sig_info_fault, random_value,
};
use crate::matcher::TestOutcome;
use crate::registry::TestId;
use crate::store::{Session, StoredKex, StoredServiceInfo};
use fdo_cbor::{CborCodec, SerializationResult};
use fdo_crypto::cose;
use fdo_crypto::envelope::{SessionKey, add_encryption_wrapping, remove_encryption_wrapping};
use fdo_crypto::hash::FdoHash;
use fdo_crypto::kex::{KexRole, KeyExchange};
use fdo_protocol::devmod::missing_mandatory;
use fdo_protocol::to2::{
    DEFAULT_MAX_SERVICE_INFO_SIZE, DeviceServiceInfo, DeviceServiceInfoReady, Done, Done2,
    GetOvNextEntry, HelloDevice, MAX_SERVICE_INFO_ROUNDS, OvNextEntry, OwnerServiceInfo,
    OwnerServiceInfoReady,
    ProveDevice, ProveOvHdr, ProveOvHdrPayload, SetupDevice, SetupDevicePayload,
};
use fdo_protocol::types::ServiceInfoKv;
use fdo_protocol::voucher::GeneratedVoucher;
use fdo_protocol::{Cmd, Guid, Nonce, Protocol, ProtocolError};
use tracing::{debug, info};

/// How to damage an encrypted reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corrupt {
    Nothing,
    Plaintext,
    Envelope,
}

fn seal(key: &SessionKey, plain: &[u8], corrupt: Corrupt) -> ConformanceResult<Vec<u8>> {
    Ok(match corrupt {
        Corrupt::Nothing => add_encryption_wrapping(plain, key)?,
        Corrupt::Plaintext => add_encryption_wrapping(&random_buffer_fuzz(plain), key)?,
        Corrupt::Envelope => fuzz_encryption_wrapping(plain, key)?,
    })
}

fn open(session: &Session, body: &[u8]) -> ConformanceResult<(SessionKey, Vec<u8>)> {
    let key = session.key()?;
    let plain = remove_encryption_wrapping(body, &key)?;
    Ok((key, plain))
}

fn device_guid(session: &Session) -> ConformanceResult<Guid> {
    session
        .guid
        .ok_or_else(|| ProtocolError::BadSession("TO2 session names no device".into()).into())
}

impl Listener {
    pub(super) async fn owner(
        &self,
        cmd: Cmd,
        session: Option<Session>,
        body: &[u8],
        fault: Option<TestId>,
    ) -> ConformanceResult<Handled> {
        match cmd {
            Cmd::To2HelloDevice => self.hello_device60(body, fault).await,
            Cmd::To2GetOvNextEntry => self.get_ov_next_entry62(in_session(session)?, body, fault).await,
            Cmd::To2ProveDevice => self.prove_device64(in_session(session)?, body, fault).await,
            Cmd::To2DeviceServiceInfoReady => {
                self.device_service_info_ready66(in_session(session)?, body, fault)
            }
            Cmd::To2DeviceServiceInfo => self.device_service_info68(in_session(session)?, body),
            Cmd::To2Done => done70(in_session(session)?, body, fault),
            other => Err(ProtocolError::Decode(format!("message {other} is not an owner request")).into()),
        }
    }

    async fn generated_for(&self, guid: &Guid) -> ConformanceResult<GeneratedVoucher> {
        self.stores.vouchers.get(guid).await?.to_generated()
    }

    async fn hello_device60(&self, body: &[u8], fault: Option<TestId>) -> ConformanceResult<Handled> {
        let hello = HelloDevice::from_bytes(body)?;
        let kex_suite = hello.kex_suite()?;
        let cipher_suite = hello.cipher()?;
        if !hello.ea_sig_info.is_supported() {
            return Err(ProtocolError::Unsupported(format!(
                "eASigInfo type {}",
                hello.ea_sig_info.sg_type
            ))
            .into());
        }
        let generated = self.generated_for(&hello.guid).await?;
        let voucher = &generated.voucher;
        voucher
            .validate()
            .map_err(|e| ProtocolError::Decode(format!("invalid ownership voucher: {e}")))?;
        let num_entries = u8::try_from(voucher.entries.len())
            .map_err(|_| ConformanceError::Invalid("voucher has more than 255 entries".into()))?;

        let kex = KeyExchange::generate(kex_suite)?;
        let hash_type = voucher.header_hmac.hash_type.to_digest();
        let nonce_prove_dv = Nonce::random();
        let mut payload = ProveOvHdrPayload {
            header_bytes: voucher.header_bytes.clone(),
            num_entries,
            header_hmac: voucher.header_hmac.clone(),
            nonce_prove_ov: hello.nonce_prove_ov,
            eb_sig_info: hello.ea_sig_info.clone(),
            xa_key_exchange: kex.public_param(),
            hello_device_hash: FdoHash::digest(hash_type, body),
            max_owner_message_size: 0,
        };
        match fault {
            Some(TestId::Listener60BadHelloDeviceHash) => {
                payload.hello_device_hash = random_hash_fault(&payload.hello_device_hash, body, None)?;
            }
            Some(TestId::Listener60BadNonceTo2ProveOv) => payload.nonce_prove_ov = Nonce::random(),
            Some(TestId::Listener60BadEbSigInfo) => {
                payload.eb_sig_info = random_sig_info_fault(&payload.eb_sig_info);
            }
            Some(TestId::Listener60BadOvHdrOvHeader) => {
                let mut header = voucher.header()?;
                header.mfg_pub_key = random_public_key_fault(&header.mfg_pub_key);
                payload.header_bytes = header.to_bytes()?;
            }
            _ => {}
        }

        let mut prove = ProveOvHdr::sign(&payload, &generated.owner_key, nonce_prove_dv)?;
        match fault {
            Some(TestId::Listener60BadHelloAckPayloadEncoding) => {
                let unprotected = prove.0.unprotected.clone();
                prove = ProveOvHdr(cose::sign1(
                    random_buffer_fuzz(&payload.to_bytes()?),
                    &generated.owner_key,
                    unprotected,
                ));
            }
            Some(TestId::Listener60BadCoseSignature) => prove = ProveOvHdr(fuzz_cose_sign1(prove.0)),
            _ => {}
        }
        let mut reply = prove.to_bytes()?;
        if fault == Some(TestId::Listener60BadHelloAckEncoding) {
            reply = random_buffer_fuzz(&reply);
        }

        let mut session = Session::new(Protocol::To2);
        session.guid = Some(hello.guid);
        session.nonce_prove_ov = Some(hello.nonce_prove_ov);
        session.nonce_prove_dv = Some(nonce_prove_dv);
        session.kex = Some(StoredKex::export(&kex));
        session.cipher_suite = Some(cipher_suite);
        session.hash_type = Some(hash_type);
        session.num_entries = num_entries;
        debug!(guid = %hello.guid, kex = %kex_suite, ?cipher_suite, "owner proof sent");

        let mut handled = Handled::new(session, Cmd::To2ProveOvHdr, reply);
        handled.send_token = fault != Some(TestId::Listener60MissingAuthzHeader);
        Ok(handled)
    }

    async fn get_ov_next_entry62(
        &self,
        mut session: Session,
        body: &[u8],
        fault: Option<TestId>,
    ) -> ConformanceResult<Handled> {
        let request = GetOvNextEntry::from_bytes(body)?;
        if request.entry_num >= session.num_entries {
            return Err(ProtocolError::Decode(format!(
                "voucher entry {} requested, voucher has {}",
                request.entry_num, session.num_entries
            ))
            .into());
        }
        let voucher = self
            .stores
            .vouchers
            .get(&device_guid(&session)?)
            .await?
            .ownership_voucher()?;
        let entry = voucher
            .entries
            .get(usize::from(request.entry_num))
            .cloned()
            .ok_or_else(|| ConformanceError::Invalid("stored voucher lost an entry".into()))?;
        if !session.requested_entries.contains(&request.entry_num) {
            session.requested_entries.push(request.entry_num);
        }

        let mut message = OvNextEntry {
            entry_num: request.entry_num,
            entry,
        };
        match fault {
            Some(TestId::Listener62BadOvEntryCoseSignature) => {
                message.entry = fuzz_signature(message.entry);
            }
            Some(TestId::Listener62BadOvEntryNum) => {
                message.entry_num = message.entry_num.wrapping_add(1);
            }
            _ => {}
        }
        let mut reply = message.to_bytes()?;
        if fault == Some(TestId::Listener62BadOvNextEntryPayload) {
            reply = random_buffer_fuzz(&reply);
        }
        Ok(Handled::new(session, Cmd::To2OvNextEntry, reply))
    }

    async fn prove_device64(
        &self,
        mut session: Session,
        body: &[u8],
        fault: Option<TestId>,
    ) -> ConformanceResult<Handled> {
        let message = ProveDevice::from_bytes(body)?;
        let eat = message.eat()?;
        let guid = device_guid(&session)?;
        if eat.nonce != Session::required(session.nonce_prove_dv, "NonceTO2ProveDv")? {
            return Err(ProtocolError::Verification("EAT nonce does not match ProveOVHdr".into()).into());
        }
        if eat.guid() != Some(guid) {
            return Err(ProtocolError::Verification("EAT UEID names another device".into()).into());
        }
        let generated = self.generated_for(&guid).await?;
        verify_device(&generated.voucher, &message.0)?;

        let xb = message.xb_key_exchange()?;
        let nonce_setup_dv = message.nonce_setup_dv()?;
        let kex = session
            .kex
            .take()
            .ok_or_else(|| ProtocolError::BadSession("key exchange not started".into()))?
            .restore()?;
        let cipher_suite = session
            .cipher_suite
            .ok_or_else(|| ProtocolError::BadSession("cipher suite not negotiated".into()))?;
        let key = kex.derive_session_key(&xb, KexRole::Owner, cipher_suite)?;
        session.session_key = Some(key.material().to_vec());
        session.nonce_setup_dv = Some(nonce_setup_dv);

        let mut records = Vec::new();
        let skipped: Vec<u8> = (0..session.num_entries)
            .filter(|i| !session.requested_entries.contains(i))
            .collect();
        if !skipped.is_empty() {
            records.push((
                TestId::Listener62Positive,
                TestOutcome::fail(format!("device never requested voucher entries {skipped:?}")),
            ));
        }

        let mut payload = SetupDevicePayload {
            rv_info: generated.voucher.header()?.rv_info,
            replacement_guid: guid,
            nonce_setup_dv,
            owner2_key: generated.owner_key.public_key()?,
        };
        if fault == Some(TestId::Listener64BadNonceTo2SetupDv) {
            payload.nonce_setup_dv = Nonce::random();
        }
        let mut setup = match fault {
            Some(TestId::Listener64BadSetupDevicePayload) => SetupDevice(cose::sign1(
                random_buffer_fuzz(&payload.to_bytes()?),
                &generated.owner_key,
                cose::no_headers(),
            )),
            _ => SetupDevice::sign(&payload, &generated.owner_key)?,
        };
        if fault == Some(TestId::Listener64BadSetupDeviceCoseSignature) {
            setup = SetupDevice(fuzz_signature(setup.0));
        }
        let plain = match fault {
            Some(TestId::Listener64BadSetupDeviceBytes) => random_buffer_fuzz(&setup.to_bytes()?),
            Some(TestId::Listener64BadSetupDeviceEncoding) => fdo_cbor::encode_value(&random_value(2))?,
            _ => setup.to_bytes()?,
        };
        let corrupt = if fault == Some(TestId::Listener64BadEncWrapping) {
            Corrupt::Envelope
        } else {
            Corrupt::Nothing
        };
        let reply = seal(&key, &plain, corrupt)?;

        let mut handled = Handled::new(session, Cmd::To2SetupDevice, reply);
        handled.records = records;
        Ok(handled)
    }

    fn device_service_info_ready66(
        &self,
        mut session: Session,
        body: &[u8],
        fault: Option<TestId>,
    ) -> ConformanceResult<Handled> {
        let (key, plain) = open(&session, body)?;
        let ready = DeviceServiceInfoReady::from_bytes(&plain)?;
        if ready.replacement_hmac.is_some() {
            debug!("device offered a replacement HMAC; keeping the current credential");
        }
        debug!(
            max_owner_service_info_size = ready
                .max_owner_service_info_size
                .unwrap_or(DEFAULT_MAX_SERVICE_INFO_SIZE),
            "device ready for service info"
        );
        session.max_device_service_info_size = Some(self.config.max_device_service_info_size);

        let reply = OwnerServiceInfoReady {
            max_device_service_info_size: Some(self.config.max_device_service_info_size),
        }
        .to_bytes()?;
        let corrupt = match fault {
            Some(TestId::Listener66BadEncoding) => Corrupt::Plaintext,
            Some(TestId::Listener66BadEncWrapping) => Corrupt::Envelope,
            _ => Corrupt::Nothing,
        };
        Ok(Handled::new(
            session,
            Cmd::To2OwnerServiceInfoReady,
            seal(&key, &reply, corrupt)?,
        ))
    }

    /// Buffers device items while the device has more, validates devmod once
    /// it is done, then hands out owner items one per round.
    fn device_service_info68(&self, mut session: Session, body: &[u8]) -> ConformanceResult<Handled> {
        let (key, plain) = open(&session, body)?;
        session.service_info_rounds += 1;
        if session.service_info_rounds > MAX_SERVICE_INFO_ROUNDS {
            return Err(ProtocolError::Decode(format!(
                "service info exchange exceeded {MAX_SERVICE_INFO_ROUNDS} rounds"
            ))
            .into());
        }
        let limit = session
            .max_device_service_info_size
            .unwrap_or(DEFAULT_MAX_SERVICE_INFO_SIZE);
        if plain.len() > usize::from(limit) {
            return Err(ProtocolError::Decode(format!(
                "DeviceServiceInfo of {} bytes exceeds the announced {limit}",
                plain.len()
            ))
            .into());
        }
        let message = DeviceServiceInfo::from_bytes(&plain)?;

        let reply = if session.device_service_info_done {
            if message.is_more || !message.service_info.is_empty() {
                return Err(ProtocolError::Decode(
                    "device sent service info after declaring it complete".into(),
                )
                .into());
            }
            self.next_owner_info(&mut session)
        } else {
            for kv in &message.service_info {
                session.device_service_info.push(StoredServiceInfo {
                    key: kv.key.clone(),
                    value: fdo_cbor::encode_value(&kv.value)?,
                });
            }
            if message.is_more {
                OwnerServiceInfo {
                    is_more: false,
                    is_done: false,
                    service_info: Vec::new(),
                }
            } else {
                session.device_service_info_done = true;
                let received = session
                    .device_service_info
                    .iter()
                    .map(|s| Ok(ServiceInfoKv::new(s.key.clone(), fdo_cbor::decode_value(&s.value)?)))
                    .collect::<SerializationResult<Vec<_>>>()?;
                let missing = missing_mandatory(&received);
                if !missing.is_empty() {
                    return Err(ProtocolError::Decode(format!(
                        "devmod is missing {}",
                        missing.join(", ")
                    ))
                    .into());
                }
                debug!(items = received.len(), "device service info complete");
                self.next_owner_info(&mut session)
            }
        };

        let finished = session.owner_done;
        let mut handled = Handled::new(
            session,
            Cmd::To2OwnerServiceInfo,
            seal(&key, &reply.to_bytes()?, Corrupt::Nothing)?,
        );
        handled.finished = finished;
        Ok(handled)
    }

    fn next_owner_info(&self, session: &mut Session) -> OwnerServiceInfo {
        match self.config.owner_sims.get(session.owner_sims_sent) {
            Some(item) => {
                session.owner_sims_sent += 1;
                OwnerServiceInfo {
                    is_more: false,
                    is_done: false,
                    service_info: vec![item.clone()],
                }
            }
            None => {
                session.owner_done = true;
                OwnerServiceInfo {
                    is_more: false,
                    is_done: true,
                    service_info: Vec::new(),
                }
            }
        }
    }
}

fn done70(session: Session, body: &[u8], fault: Option<TestId>) -> ConformanceResult<Handled> {
    let (key, plain) = open(&session, body)?;
    let done = Done::from_bytes(&plain)?;
    if !session.owner_done {
        return Err(ProtocolError::Decode("Done before the owner finished service info".into()).into());
    }
    if done.nonce_prove_dv != Session::required(session.nonce_prove_dv, "NonceTO2ProveDv")? {
        return Err(ProtocolError::Verification("Done nonce does not match ProveOVHdr".into()).into());
    }

    let nonce_setup_dv = if fault == Some(TestId::Listener70BadNonceTo2SetupDv64) {
        Nonce::random()
    } else {
        Session::required(session.nonce_setup_dv, "NonceTO2SetupDv")?
    };
    let corrupt = match fault {
        Some(TestId::Listener70BadDone71Encoding) => Corrupt::Plaintext,
        Some(TestId::Listener70BadEncWrapping) => Corrupt::Envelope,
        _ => Corrupt::Nothing,
    };
    let reply = seal(&key, &Done2 { nonce_setup_dv }.to_bytes()?, corrupt)?;
    if let Some(guid) = session.guid {
        info!(%guid, "device onboarded");
    }
    Ok(Handled::new(session, Cmd::To2Done2, reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerConfig;
    use crate::store::{Stores, VoucherRecord};
    use fdo_crypto::envelope::CipherSuite;
    use fdo_protocol::devmod::DevmodInfo;
    use fdo_crypto::kex::KexSuite;
    use fdo_protocol::types::{RendezvousInfo, SigInfo};
    use fdo_protocol::voucher::{VoucherBuilder, VoucherFault};
    use fdo_protocol::FdoErrorCode;
    use fdo_store::{MemoryKvStore, MemoryStoreConfig};
    use std::sync::Arc;

    async fn setup(entries: usize) -> (Listener, GeneratedVoucher, String, ProveOvHdrPayload) {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        let listener = Listener::new(Stores::over(kv), ListenerConfig::default());
        let g = VoucherBuilder::new(RendezvousInfo::from_urls(&["http://rv.example"]).unwrap())
            .entry_count(entries)
            .build()
            .unwrap();
        listener
            .stores()
            .vouchers
            .save(&VoucherRecord::from_generated(&g).unwrap())
            .await
            .unwrap();
        let hello = HelloDevice::new(g.credential.guid, KexSuite::Ecdh256, CipherSuite::A128Gcm, SigInfo::es256());
        let reply = listener
            .handle(Cmd::To2HelloDevice, None, &hello.to_bytes().unwrap())
            .await
            .unwrap();
        let prove = ProveOvHdr::from_bytes(&reply.body).unwrap();
        let payload = prove.payload().unwrap();
        (listener, g, reply.token.unwrap(), payload)
    }

    #[tokio::test]
    async fn prove_ov_hdr_echoes_and_binds_the_hello() {
        let (_, g, _, payload) = setup(2).await;
        assert_eq!(payload.num_entries, 2);
        assert_eq!(payload.header_bytes, g.voucher.header_bytes);
        payload
            .header_hmac
            .verify_hmac(&g.credential.hmac_secret, &payload.header_bytes)
            .unwrap();
    }

    #[tokio::test]
    async fn entries_are_served_by_index() {
        let (listener, g, token, _) = setup(2).await;
        for i in 0..2u8 {
            let reply = listener
                .handle(
                    Cmd::To2GetOvNextEntry,
                    Some(&token),
                    &GetOvNextEntry { entry_num: i }.to_bytes().unwrap(),
                )
                .await
                .unwrap();
            let next = OvNextEntry::from_bytes(&reply.body).unwrap();
            assert_eq!(next.entry_num, i);
            assert_eq!(next.entry, g.voucher.entries[usize::from(i)]);
        }
    }

    #[tokio::test]
    async fn entry_index_past_the_end_is_a_body_error() {
        let (listener, _, token, payload) = setup(1).await;
        let err = listener
            .handle(
                Cmd::To2GetOvNextEntry,
                Some(&token),
                &GetOvNextEntry {
                    entry_num: payload.num_entries,
                }
                .to_bytes()
                .unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::MessageBodyError);
        assert_ne!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn hello_for_a_faulted_voucher_is_refused() {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        let listener = Listener::new(Stores::over(kv), ListenerConfig::default());
        for fault in VoucherFault::ALL {
            let g = VoucherBuilder::new(RendezvousInfo::from_urls(&["http://rv.example"]).unwrap())
                .entry_count(2)
                .fault(Some(fault))
                .build()
                .unwrap();
            listener
                .stores()
                .vouchers
                .save(&VoucherRecord::from_generated(&g).unwrap())
                .await
                .unwrap();
            let hello = HelloDevice::new(g.credential.guid, KexSuite::Ecdh256, CipherSuite::A128Gcm, SigInfo::es256());
            let err = listener
                .handle(Cmd::To2HelloDevice, None, &hello.to_bytes().unwrap())
                .await
                .unwrap_err();
            assert_ne!(err.http_status(), 200, "{fault:?}");
        }
    }

    /// Listener plus a TO2 session parked just after DeviceServiceInfoReady.
    async fn service_info_session() -> (Listener, SessionKey, String) {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        let listener = Listener::new(Stores::over(kv), ListenerConfig::default());
        let material = vec![7u8; CipherSuite::A128Gcm.kdf_output_len()];
        let mut session = Session::new(Protocol::To2);
        session.prev_cmd = Cmd::To2DeviceServiceInfoReady;
        session.guid = Some(Guid::random());
        session.cipher_suite = Some(CipherSuite::A128Gcm);
        session.session_key = Some(material.clone());
        let token = listener.stores().sessions.create(&session).await.unwrap();
        let key = SessionKey::from_material(CipherSuite::A128Gcm, &material).unwrap();
        (listener, key, token)
    }

    #[tokio::test]
    async fn service_info_rounds_are_capped() {
        let (listener, key, token) = service_info_session().await;
        let item = DevmodInfo::default().service_info().remove(0);
        let message = DeviceServiceInfo {
            is_more: true,
            service_info: vec![item],
        }
        .to_bytes()
        .unwrap();

        for round in 1..=MAX_SERVICE_INFO_ROUNDS {
            let body = add_encryption_wrapping(&message, &key).unwrap();
            let reply = listener
                .handle(Cmd::To2DeviceServiceInfo, Some(&token), &body)
                .await
                .unwrap_or_else(|err| panic!("round {round} rejected: {err}"));
            assert_eq!(reply.cmd, Cmd::To2OwnerServiceInfo);
        }

        let body = add_encryption_wrapping(&message, &key).unwrap();
        let err = listener
            .handle(Cmd::To2DeviceServiceInfo, Some(&token), &body)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::MessageBodyError);
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn unsupported_kex_suite_is_rejected() {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        let listener = Listener::new(Stores::over(kv), ListenerConfig::default());
        let mut hello = HelloDevice::new(Guid::random(), KexSuite::Ecdh256, CipherSuite::A128Gcm, SigInfo::es256());
        hello.kex_suite_name = "ASYMKEX2048".into();
        let err = listener
            .handle(Cmd::To2HelloDevice, None, &hello.to_bytes().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::MessageBodyError);
    }
}
