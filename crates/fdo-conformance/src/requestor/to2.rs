//! TO2: a device proves itself to its owner and receives service info.
//!
//! The requestor is a small state machine. Each step checks it runs in the
//! right state, so driving it out of order is an error rather than a
//! confusing protocol failure at the far end.

use super::{StepOutcome, negative_for, passes_at, send_faulted};
use crate::error::{ConformanceError, ConformanceResult};
use crate::fuzz::{fuzz_encryption_wrapping, fuzz_signature, random_buffer_fuzz};
use crate::matcher::TestOutcome;
use crate::registry::TestId;
use fdo_cbor::CborCodec;
use fdo_crypto::cose;
use fdo_crypto::envelope::{CipherSuite, SessionKey, add_encryption_wrapping, remove_encryption_wrapping};
use fdo_crypto::keys::FdoPublicKey;
use fdo_crypto::kex::{KexRole, KexSuite, KeyExchange};
use fdo_protocol::devmod::DevmodInfo;
use fdo_protocol::to2::{
    DEFAULT_MAX_SERVICE_INFO_SIZE, DeviceServiceInfo, DeviceServiceInfoReady, Done, Done2,
    GetOvNextEntry, HelloDevice, MAX_SERVICE_INFO_ROUNDS, OvNextEntry, OwnerServiceInfo,
    OwnerServiceInfoReady, ProveDevice, ProveOvHdr, ProveOvHdrPayload, SetupDevice, SetupDevicePayload,
};
use fdo_protocol::transport::FdoClient;
use fdo_protocol::types::ServiceInfoKv;
use fdo_protocol::voucher::{DeviceCredential, OvHeader, verify_entry_chain};
use fdo_protocol::{Cmd, Nonce, ProtocolError};
use rand::Rng;
use tracing::{debug, info, instrument};

/// Negotiation and limits for a TO2 run.
#[derive(Debug, Clone)]
pub struct To2Config {
    pub kex_suite: KexSuite,
    pub cipher_suite: CipherSuite,
    /// Upper bound on `DeviceServiceInfo` messages, devmod items included.
    pub max_service_info_rounds: usize,
    pub devmod: DevmodInfo,
}

impl Default for To2Config {
    fn default() -> Self {
        Self {
            kex_suite: KexSuite::Ecdh256,
            cipher_suite: CipherSuite::A128Gcm,
            max_service_info_rounds: MAX_SERVICE_INFO_ROUNDS,
            devmod: DevmodInfo::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    OwnerProven,
    EntriesVerified,
    DeviceProven,
    Ready,
    ServiceInfoDone,
    Done,
}

impl Step {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::OwnerProven => "owner-proven",
            Self::EntriesVerified => "entries-verified",
            Self::DeviceProven => "device-proven",
            Self::Ready => "service-info-ready",
            Self::ServiceInfoDone => "service-info-done",
            Self::Done => "done",
        }
    }
}

/// What ProveOVHdr established.
#[derive(Debug)]
struct OwnerProof {
    token: String,
    payload: ProveOvHdrPayload,
    header: OvHeader,
    owner_key: FdoPublicKey,
    nonce_prove_dv: Nonce,
}

/// The encrypted channel opened by ProveDevice/SetupDevice.
#[derive(Debug)]
struct Tunnel {
    key: SessionKey,
    nonce_setup_dv: Nonce,
    max_device_service_info_size: u16,
}

/// Device side of TO2.
#[derive(Debug)]
pub struct To2Requestor {
    client: FdoClient,
    credential: DeviceCredential,
    config: To2Config,
    step: Step,
    proof: Option<OwnerProof>,
    tunnel: Option<Tunnel>,
}

impl To2Requestor {
    #[must_use]
    pub fn new(client: FdoClient, credential: DeviceCredential, config: To2Config) -> Self {
        Self {
            client,
            credential,
            config,
            step: Step::Start,
            proof: None,
            tunnel: None,
        }
    }

    fn require(&self, state: Step, step: &'static str) -> ConformanceResult<()> {
        if self.step == state {
            Ok(())
        } else {
            Err(ConformanceError::OutOfOrder {
                state: self.step.as_str(),
                step,
            })
        }
    }

    fn proof(&self) -> ConformanceResult<&OwnerProof> {
        self.proof
            .as_ref()
            .ok_or_else(|| ConformanceError::Invalid("no owner proof recorded".into()))
    }

    fn tunnel(&self) -> ConformanceResult<&Tunnel> {
        self.tunnel
            .as_ref()
            .ok_or_else(|| ConformanceError::Invalid("no session key established".into()))
    }

    fn seal(&self, plain: &[u8]) -> ConformanceResult<Vec<u8>> {
        Ok(add_encryption_wrapping(plain, &self.tunnel()?.key)?)
    }

    fn open(&self, sealed: &[u8]) -> ConformanceResult<Vec<u8>> {
        Ok(remove_encryption_wrapping(sealed, &self.tunnel()?.key)?)
    }

    /// Encrypt `plain` the way the identity asks: fuzzed before sealing for
    /// encoding faults, corrupted envelope for encryption faults.
    fn seal_faulted(&self, plain: &[u8], id: TestId) -> ConformanceResult<Vec<u8>> {
        match id {
            TestId::Dot66BadEncryption | TestId::Dot68BadEncryption | TestId::Dot70BadEncryption => {
                Ok(fuzz_encryption_wrapping(plain, &self.tunnel()?.key)?)
            }
            TestId::Dot66BadSrvInfoPayload | TestId::Dot68BadEncoding | TestId::Dot70BadEncoding => {
                self.seal(&random_buffer_fuzz(plain))
            }
            _ => self.seal(plain),
        }
    }

    /// `TO2.HelloDevice` (60) and its `ProveOVHdr` (61).
    ///
    /// Verifies the owner signature, both nonce echoes, the HelloDevice hash
    /// and the voucher header HMAC against the device secret.
    ///
    /// # Errors
    /// Transport failures, error replies and any failed check.
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn hello_device60(
        &mut self,
        test: Option<TestId>,
    ) -> ConformanceResult<StepOutcome<ProveOvHdrPayload>> {
        self.require(Step::Start, "HelloDevice60")?;
        let hello = HelloDevice::new(
            self.credential.guid,
            self.config.kex_suite,
            self.config.cipher_suite,
            self.credential.sig_info(),
        );
        let body = hello.to_bytes()?;

        if let Some(id) = negative_for(test, Cmd::To2HelloDevice) {
            return send_faulted(&self.client, id, Cmd::To2HelloDevice, random_buffer_fuzz(&body), None)
                .await;
        }
        if let Some(id) = test.filter(|id| id.voucher_fault().is_some()) {
            // the owner holds a faulted voucher for this device and must refuse it
            return send_faulted(&self.client, id, Cmd::To2HelloDevice, body, None).await;
        }

        let response = self.client.send(Cmd::To2HelloDevice, body.clone(), None).await?;
        let token = response.token.clone().ok_or_else(|| {
            ProtocolError::BadSession("ProveOVHdr carried no Authorization token".into())
        })?;
        let prove = ProveOvHdr::from_bytes(&response.expect(Cmd::To2ProveOvHdr)?)?;
        let owner_key = prove.owner_pub_key()?;
        cose::verify_sign1(&prove.0, &owner_key.verifying_key()?)?;

        let payload = prove.payload()?;
        if payload.nonce_prove_ov != hello.nonce_prove_ov {
            return Err(verification("ProveOVHdr does not echo NonceTO2ProveOV"));
        }
        if payload.eb_sig_info != hello.ea_sig_info {
            return Err(ProtocolError::Decode("ProveOVHdr eBSigInfo does not echo eASigInfo".into()).into());
        }
        payload
            .hello_device_hash
            .verify_digest(&body)
            .map_err(|_| verification("helloDeviceHash does not cover HelloDevice"))?;
        payload
            .header_hmac
            .verify_hmac(&self.credential.hmac_secret, &payload.header_bytes)
            .map_err(|_| verification("voucher header HMAC does not match the device secret"))?;
        if payload.hello_device_hash.hash_type != payload.header_hmac.hash_type.to_digest() {
            return Err(verification("helloDeviceHash type does not match the voucher"));
        }
        let header = OvHeader::from_bytes(&payload.header_bytes)?;
        if header.guid != self.credential.guid {
            return Err(verification("voucher header names another device"));
        }
        if payload.num_entries == 0 {
            return Err(ProtocolError::Decode("ProveOVHdr announces no voucher entries".into()).into());
        }

        self.proof = Some(OwnerProof {
            token,
            payload: payload.clone(),
            header,
            owner_key,
            nonce_prove_dv: prove.nonce_prove_dv()?,
        });
        self.step = Step::OwnerProven;
        debug!(entries = payload.num_entries, "owner proved the voucher header");
        Ok(StepOutcome::Continue(payload))
    }

    /// `TO2.GetOVNextEntry` (62) for every entry, then chain verification.
    ///
    /// # Errors
    /// Transport failures, error replies, an entry out of sequence or a
    /// chain that does not end in the key that signed ProveOVHdr.
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn get_ov_next_entry62(&mut self, test: Option<TestId>) -> ConformanceResult<StepOutcome<u8>> {
        self.require(Step::OwnerProven, "GetOVNextEntry62")?;
        let proof = self.proof()?;
        let num_entries = proof.payload.num_entries;
        let fault = negative_for(test, Cmd::To2GetOvNextEntry);
        let fault_at = rand::thread_rng().gen_range(0..num_entries);

        let mut entries = Vec::with_capacity(num_entries.into());
        for entry_num in 0..num_entries {
            match fault {
                Some(id @ TestId::Dot62GetOvNextBadIndex) if entry_num == fault_at => {
                    let body = GetOvNextEntry { entry_num: num_entries }.to_bytes()?;
                    return send_faulted(&self.client, id, Cmd::To2GetOvNextEntry, body, Some(&proof.token))
                        .await;
                }
                Some(id) if entry_num == fault_at => {
                    let body = random_buffer_fuzz(&GetOvNextEntry { entry_num }.to_bytes()?);
                    return send_faulted(&self.client, id, Cmd::To2GetOvNextEntry, body, Some(&proof.token))
                        .await;
                }
                _ => {}
            }

            let response = self
                .client
                .send(
                    Cmd::To2GetOvNextEntry,
                    GetOvNextEntry { entry_num }.to_bytes()?,
                    Some(&proof.token),
                )
                .await?;
            let next = OvNextEntry::from_bytes(&response.expect(Cmd::To2OvNextEntry)?)?;
            if next.entry_num != entry_num {
                return Err(ProtocolError::Decode(format!(
                    "asked for voucher entry {entry_num}, got {}",
                    next.entry_num
                ))
                .into());
            }
            entries.push(next.entry);
        }

        let last_key = verify_entry_chain(
            &proof.payload.header_bytes,
            &proof.payload.header_hmac,
            &proof.header,
            &entries,
        )?;
        if last_key.verifying_key()? != proof.owner_key.verifying_key()? {
            return Err(verification("voucher does not end in the key that signed ProveOVHdr"));
        }
        self.step = Step::EntriesVerified;
        Ok(StepOutcome::Continue(num_entries))
    }

    /// `TO2.ProveDevice` (64) and the encrypted `SetupDevice` (65).
    ///
    /// ProveDevice goes in clear; the session key is derived from the
    /// owner's `xAKeyExchange` and our `xBKeyExchange`.
    ///
    /// # Errors
    /// Transport failures, error replies, key exchange failures and a
    /// SetupDevice that is unsigned or does not echo NonceTO2SetupDv.
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn prove_device64(
        &mut self,
        test: Option<TestId>,
    ) -> ConformanceResult<StepOutcome<SetupDevicePayload>> {
        self.require(Step::EntriesVerified, "ProveDevice64")?;
        let proof = self.proof()?;
        let kex = KeyExchange::generate(self.config.kex_suite)?;
        let nonce_setup_dv = Nonce::random();
        let nonce_prove_dv = if test == Some(TestId::Dot64BadNonceProveDv61) {
            Nonce::random()
        } else {
            proof.nonce_prove_dv
        };

        let mut message = ProveDevice::sign(
            &self.credential.guid,
            nonce_prove_dv,
            kex.public_param(),
            nonce_setup_dv,
            &self.credential.signing_key()?,
        )?;
        if test == Some(TestId::Dot64BadSignature) {
            message = ProveDevice(fuzz_signature(message.0));
        }
        let body = message.to_bytes()?;

        if let Some(id) = negative_for(test, Cmd::To2ProveDevice) {
            return send_faulted(&self.client, id, Cmd::To2ProveDevice, body, Some(&proof.token)).await;
        }

        let response = self
            .client
            .send(Cmd::To2ProveDevice, body, Some(&proof.token))
            .await?;
        let sealed = response.expect(Cmd::To2SetupDevice)?;
        let key = kex.derive_session_key(
            &proof.payload.xa_key_exchange,
            KexRole::Device,
            self.config.cipher_suite,
        )?;
        let setup = SetupDevice::from_bytes(&remove_encryption_wrapping(&sealed, &key)?)?;
        let payload = setup.payload()?;
        cose::verify_sign1(&setup.0, &payload.owner2_key.verifying_key()?)?;
        if payload.nonce_setup_dv != nonce_setup_dv {
            return Err(verification("SetupDevice does not echo NonceTO2SetupDv"));
        }

        self.tunnel = Some(Tunnel {
            key,
            nonce_setup_dv,
            max_device_service_info_size: DEFAULT_MAX_SERVICE_INFO_SIZE,
        });
        self.step = Step::DeviceProven;
        Ok(StepOutcome::Continue(payload))
    }

    /// `TO2.DeviceServiceInfoReady` (66) and `OwnerServiceInfoReady` (67).
    ///
    /// The device keeps its credential, so no replacement HMAC is sent.
    ///
    /// # Errors
    /// Transport failures, error replies and undecryptable replies.
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn device_service_info_ready66(
        &mut self,
        test: Option<TestId>,
    ) -> ConformanceResult<StepOutcome<OwnerServiceInfoReady>> {
        self.require(Step::DeviceProven, "DeviceServiceInfoReady66")?;
        let token = self.proof()?.token.clone();
        let plain = DeviceServiceInfoReady {
            replacement_hmac: None,
            max_owner_service_info_size: Some(DEFAULT_MAX_SERVICE_INFO_SIZE),
        }
        .to_bytes()?;

        if let Some(id) = negative_for(test, Cmd::To2DeviceServiceInfoReady) {
            let body = self.seal_faulted(&plain, id)?;
            return send_faulted(&self.client, id, Cmd::To2DeviceServiceInfoReady, body, Some(&token))
                .await;
        }

        let response = self
            .client
            .send(Cmd::To2DeviceServiceInfoReady, self.seal(&plain)?, Some(&token))
            .await?;
        let ready = OwnerServiceInfoReady::from_bytes(
            &self.open(&response.expect(Cmd::To2OwnerServiceInfoReady)?)?,
        )?;
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.max_device_service_info_size = ready
                .max_device_service_info_size
                .unwrap_or(DEFAULT_MAX_SERVICE_INFO_SIZE);
        }
        self.step = Step::Ready;
        Ok(StepOutcome::Continue(ready))
    }

    async fn exchange_service_info(
        &self,
        token: &str,
        message: &DeviceServiceInfo,
    ) -> ConformanceResult<OwnerServiceInfo> {
        let response = self
            .client
            .send(Cmd::To2DeviceServiceInfo, self.seal(&message.to_bytes()?)?, Some(token))
            .await?;
        Ok(OwnerServiceInfo::from_bytes(
            &self.open(&response.expect(Cmd::To2OwnerServiceInfo)?)?,
        )?)
    }

    /// `TO2.DeviceServiceInfo` (68) / `OwnerServiceInfo` (69) until the
    /// owner is done.
    ///
    /// The devmod items go one per message. While the device has more, the
    /// owner must answer with an empty, unfinished reply; after that the
    /// device polls with empty messages and collects the owner's items.
    ///
    /// # Errors
    /// Transport failures, error replies, an owner that talks while the
    /// device still has more, or [`ConformanceError::RoundLimit`].
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn device_service_info68(
        &mut self,
        test: Option<TestId>,
    ) -> ConformanceResult<StepOutcome<Vec<ServiceInfoKv>>> {
        self.require(Step::Ready, "DeviceServiceInfo68")?;
        let token = self.proof()?.token.clone();
        let max_size = usize::from(self.tunnel()?.max_device_service_info_size);
        let items = self.config.devmod.service_info();
        let fault = negative_for(test, Cmd::To2DeviceServiceInfo);
        let fault_at = rand::thread_rng().gen_range(0..items.len());
        let last = items.len() - 1;

        let mut reply = None;
        let mut rounds = 0;
        for (i, item) in items.into_iter().enumerate() {
            let message = DeviceServiceInfo {
                is_more: i < last,
                service_info: vec![item],
            };
            let plain = message.to_bytes()?;
            if plain.len() > max_size {
                return Err(ConformanceError::Invalid(format!(
                    "devmod item of {} bytes exceeds the owner's limit of {max_size}",
                    plain.len()
                )));
            }
            if let Some(id) = fault.filter(|id| *id != TestId::Dot68BadCompletionLogic && i == fault_at) {
                let body = self.seal_faulted(&plain, id)?;
                return send_faulted(&self.client, id, Cmd::To2DeviceServiceInfo, body, Some(&token))
                    .await;
            }

            if rounds >= self.config.max_service_info_rounds {
                return Err(ConformanceError::RoundLimit { rounds });
            }
            let owner = self.exchange_service_info(&token, &message).await?;
            rounds += 1;
            if message.is_more && (owner.is_done || owner.is_more || !owner.service_info.is_empty()) {
                return Err(ProtocolError::Decode(
                    "owner sent service info while the device still had more".into(),
                )
                .into());
            }
            reply = Some(owner);
        }

        if let Some(id) = fault.filter(|id| *id == TestId::Dot68BadCompletionLogic) {
            let reopened = DeviceServiceInfo {
                is_more: true,
                service_info: self.config.devmod.service_info().into_iter().take(1).collect(),
            };
            let body = self.seal(&reopened.to_bytes()?)?;
            return send_faulted(&self.client, id, Cmd::To2DeviceServiceInfo, body, Some(&token)).await;
        }

        let mut owner_items = Vec::new();
        let mut reply = reply.ok_or_else(|| ConformanceError::Invalid("no devmod items to send".into()))?;
        loop {
            owner_items.append(&mut reply.service_info);
            if reply.is_done {
                break;
            }
            if rounds >= self.config.max_service_info_rounds {
                return Err(ConformanceError::RoundLimit { rounds });
            }
            let poll = DeviceServiceInfo {
                is_more: false,
                service_info: Vec::new(),
            };
            reply = self.exchange_service_info(&token, &poll).await?;
            rounds += 1;
        }

        debug!(owner_items = owner_items.len(), rounds, "service info exchange finished");
        self.step = Step::ServiceInfoDone;
        Ok(StepOutcome::Continue(owner_items))
    }

    /// `TO2.Done` (70) and `Done2` (71).
    ///
    /// # Errors
    /// Transport failures, error replies and a Done2 that does not echo
    /// NonceTO2SetupDv.
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn done70(&mut self, test: Option<TestId>) -> ConformanceResult<StepOutcome<Done2>> {
        self.require(Step::ServiceInfoDone, "Done70")?;
        let proof = self.proof()?;
        let token = proof.token.clone();
        let nonce_prove_dv = if test == Some(TestId::Dot70BadNonceProveDv61) {
            Nonce::random()
        } else {
            proof.nonce_prove_dv
        };
        let plain = Done { nonce_prove_dv }.to_bytes()?;

        if let Some(id) = negative_for(test, Cmd::To2Done) {
            let body = self.seal_faulted(&plain, id)?;
            return send_faulted(&self.client, id, Cmd::To2Done, body, Some(&token)).await;
        }

        let response = self.client.send(Cmd::To2Done, self.seal(&plain)?, Some(&token)).await?;
        let done2 = Done2::from_bytes(&self.open(&response.expect(Cmd::To2Done2)?)?)?;
        if done2.nonce_setup_dv != self.tunnel()?.nonce_setup_dv {
            return Err(verification("Done2 does not echo NonceTO2SetupDv"));
        }
        self.step = Step::Done;
        info!("onboarding complete");
        Ok(StepOutcome::Continue(done2))
    }

    /// Drive the flow until `test` is decided, or to the end.
    ///
    /// A positive identity passes once the exchange it names succeeds.
    ///
    /// # Errors
    /// Any step error; the caller records it as a failure.
    pub async fn run(&mut self, test: Option<TestId>) -> ConformanceResult<TestOutcome> {
        try_step!(self.hello_device60(test).await?);
        if passes_at(test, Cmd::To2HelloDevice) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.get_ov_next_entry62(test).await?);
        if passes_at(test, Cmd::To2GetOvNextEntry) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.prove_device64(test).await?);
        if passes_at(test, Cmd::To2ProveDevice) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.device_service_info_ready66(test).await?);
        if passes_at(test, Cmd::To2DeviceServiceInfoReady) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.device_service_info68(test).await?);
        if passes_at(test, Cmd::To2DeviceServiceInfo) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.done70(test).await?);
        Ok(TestOutcome::pass())
    }
}

fn verification(what: &str) -> ConformanceError {
    ProtocolError::Verification(what.to_owned()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_crypto::hash::{FdoHash, HashType};
    use fdo_crypto::keys::Es256SigningKey;
    use fdo_protocol::transport::{ClientConfig, MESSAGE_TYPE_HEADER};
    use fdo_protocol::types::{RendezvousInfo, SigInfo};
    use fdo_protocol::voucher::{GeneratedVoucher, VoucherBuilder};
    use fdo_protocol::{ErrorMessage, FdoErrorCode};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generated() -> GeneratedVoucher {
        VoucherBuilder::new(RendezvousInfo::from_urls(&["http://rv.example"]).unwrap())
            .entry_count(1)
            .build()
            .unwrap()
    }

    fn requestor(server: &MockServer, credential: DeviceCredential) -> To2Requestor {
        let client = FdoClient::new(server.uri(), &ClientConfig::default()).unwrap();
        To2Requestor::new(client, credential, To2Config::default())
    }

    /// A ProveOVHdr that answers some other HelloDevice.
    fn stale_prove(g: &GeneratedVoucher) -> ProveOvHdr {
        let payload = ProveOvHdrPayload {
            header_bytes: g.voucher.header_bytes.clone(),
            num_entries: 1,
            header_hmac: g.voucher.header_hmac.clone(),
            nonce_prove_ov: Nonce::random(),
            eb_sig_info: SigInfo::es256(),
            xa_key_exchange: KeyExchange::generate(KexSuite::Ecdh256).unwrap().public_param(),
            hello_device_hash: FdoHash::digest(HashType::Sha256, b"another hello"),
            max_owner_message_size: 0,
        };
        ProveOvHdr::sign(&payload, &g.owner_key, Nonce::random()).unwrap()
    }

    #[tokio::test]
    async fn entries_before_hello_are_out_of_order() {
        let server = MockServer::start().await;
        let mut to2 = requestor(&server, generated().credential);
        let err = to2.get_ov_next_entry62(None).await.unwrap_err();
        assert!(matches!(
            err,
            ConformanceError::OutOfOrder { state: "start", step: "GetOVNextEntry62" }
        ));
    }

    #[tokio::test]
    async fn prove_ov_hdr_must_echo_the_nonce() {
        let server = MockServer::start().await;
        let g = generated();
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/60"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(MESSAGE_TYPE_HEADER, "61")
                    .insert_header("Authorization", "Bearer to2")
                    .set_body_bytes(stale_prove(&g).to_bytes().unwrap()),
            )
            .mount(&server)
            .await;

        let mut to2 = requestor(&server, g.credential.clone());
        let err = to2.hello_device60(None).await.unwrap_err();
        assert!(
            matches!(err, ConformanceError::Protocol(ProtocolError::Verification(ref m)) if m.contains("NonceTO2ProveOV")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn prove_ov_hdr_signed_by_a_stranger_is_rejected() {
        let server = MockServer::start().await;
        let g = generated();
        let mut prove = stale_prove(&g);
        let stranger = Es256SigningKey::generate();
        prove.0.signature = cose::sign1(b"x".to_vec(), &stranger, cose::no_headers()).signature;
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/60"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(MESSAGE_TYPE_HEADER, "61")
                    .insert_header("Authorization", "Bearer to2")
                    .set_body_bytes(prove.to_bytes().unwrap()),
            )
            .mount(&server)
            .await;

        let mut to2 = requestor(&server, g.credential);
        assert!(to2.hello_device60(None).await.is_err());
    }

    #[tokio::test]
    async fn rejected_bad_hello_passes() {
        let server = MockServer::start().await;
        let err = ErrorMessage::new(FdoErrorCode::MessageBodyError, Cmd::To2HelloDevice, "bad cbor");
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/60"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header(MESSAGE_TYPE_HEADER, "255")
                    .set_body_bytes(err.to_bytes().unwrap()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut to2 = requestor(&server, generated().credential);
        let outcome = to2.run(Some(TestId::Dot60BadEncoding)).await.unwrap();
        assert_eq!(outcome, TestOutcome::pass());
    }

    #[tokio::test]
    async fn faulted_voucher_hello_is_sent_intact_and_must_be_refused() {
        let server = MockServer::start().await;
        let err = ErrorMessage::new(FdoErrorCode::MessageBodyError, Cmd::To2HelloDevice, "bad voucher");
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/60"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header(MESSAGE_TYPE_HEADER, "255")
                    .set_body_bytes(err.to_bytes().unwrap()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let g = generated();
        let mut to2 = requestor(&server, g.credential.clone());
        let outcome = to2.run(Some(TestId::VoucherEntryBadSignature)).await.unwrap();
        assert_eq!(outcome, TestOutcome::pass());

        let sent = server.received_requests().await.unwrap();
        let hello = HelloDevice::from_bytes(&sent[0].body).unwrap();
        assert_eq!(hello.guid, g.credential.guid);
    }

    #[tokio::test]
    async fn accepted_bad_hello_fails() {
        let server = MockServer::start().await;
        let g = generated();
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/60"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(MESSAGE_TYPE_HEADER, "61")
                    .set_body_bytes(stale_prove(&g).to_bytes().unwrap()),
            )
            .mount(&server)
            .await;

        let mut to2 = requestor(&server, g.credential);
        let outcome = to2.run(Some(TestId::Dot60BadEncoding)).await.unwrap();
        assert!(!outcome.passed);
    }
    /// Requestor parked at DeviceServiceInfo68 with a known session key.
    fn ready_requestor(server: &MockServer, g: &GeneratedVoucher) -> (To2Requestor, SessionKey) {
        let material = vec![3u8; CipherSuite::A128Gcm.kdf_output_len()];
        let key = SessionKey::from_material(CipherSuite::A128Gcm, &material).unwrap();
        let mut to2 = requestor(server, g.credential.clone());
        to2.proof = Some(OwnerProof {
            token: "to2".into(),
            payload: stale_prove(g).payload().unwrap(),
            header: g.voucher.header().unwrap(),
            owner_key: g.owner_key.public_key().unwrap(),
            nonce_prove_dv: Nonce::random(),
        });
        to2.tunnel = Some(Tunnel {
            key: SessionKey::from_material(CipherSuite::A128Gcm, &material).unwrap(),
            nonce_setup_dv: Nonce::random(),
            max_device_service_info_size: DEFAULT_MAX_SERVICE_INFO_SIZE,
        });
        to2.step = Step::Ready;
        (to2, key)
    }

    fn owner_reply(key: &SessionKey, is_done: bool) -> ResponseTemplate {
        let reply = OwnerServiceInfo {
            is_more: false,
            is_done,
            service_info: Vec::new(),
        };
        ResponseTemplate::new(200)
            .insert_header(MESSAGE_TYPE_HEADER, "69")
            .set_body_bytes(add_encryption_wrapping(&reply.to_bytes().unwrap(), key).unwrap())
    }

    #[tokio::test]
    async fn owner_that_never_finishes_hits_the_round_limit() {
        let server = MockServer::start().await;
        let g = generated();
        let (mut to2, key) = ready_requestor(&server, &g);
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/68"))
            .respond_with(owner_reply(&key, false))
            .mount(&server)
            .await;

        let err = to2.device_service_info68(None).await.unwrap_err();
        assert!(
            matches!(err, ConformanceError::RoundLimit { rounds } if rounds == MAX_SERVICE_INFO_ROUNDS),
            "{err}"
        );
        let sent = server.received_requests().await.unwrap();
        assert_eq!(sent.len(), MAX_SERVICE_INFO_ROUNDS);
    }

    #[tokio::test]
    async fn owner_finishing_on_the_last_round_is_accepted() {
        let server = MockServer::start().await;
        let g = generated();
        let (mut to2, key) = ready_requestor(&server, &g);
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/68"))
            .respond_with(owner_reply(&key, false))
            .up_to_n_times(MAX_SERVICE_INFO_ROUNDS as u64 - 1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/68"))
            .respond_with(owner_reply(&key, true))
            .mount(&server)
            .await;

        let outcome = to2.device_service_info68(None).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Continue(ref items) if items.is_empty()));
        assert_eq!(to2.step, Step::ServiceInfoDone);
        let sent = server.received_requests().await.unwrap();
        assert_eq!(sent.len(), MAX_SERVICE_INFO_ROUNDS);
    }
    /// Owner that answers HelloDevice correctly except for the hash width.
    struct WrongWidthOwner(GeneratedVoucher);

    impl wiremock::Respond for WrongWidthOwner {
        fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
            let hello = HelloDevice::from_bytes(&request.body).unwrap();
            let payload = ProveOvHdrPayload {
                header_bytes: self.0.voucher.header_bytes.clone(),
                num_entries: 1,
                header_hmac: self.0.voucher.header_hmac.clone(),
                nonce_prove_ov: hello.nonce_prove_ov,
                eb_sig_info: hello.ea_sig_info,
                xa_key_exchange: KeyExchange::generate(KexSuite::Ecdh256).unwrap().public_param(),
                hello_device_hash: FdoHash::digest(HashType::Sha384, &request.body),
                max_owner_message_size: 0,
            };
            let prove = ProveOvHdr::sign(&payload, &self.0.owner_key, Nonce::random()).unwrap();
            ResponseTemplate::new(200)
                .insert_header(MESSAGE_TYPE_HEADER, "61")
                .insert_header("Authorization", "Bearer to2")
                .set_body_bytes(prove.to_bytes().unwrap())
        }
    }

    #[tokio::test]
    async fn hello_hash_of_another_width_is_rejected() {
        let server = MockServer::start().await;
        let g = generated();
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/60"))
            .respond_with(WrongWidthOwner(g.clone()))
            .mount(&server)
            .await;

        let mut to2 = requestor(&server, g.credential.clone());
        let err = to2.hello_device60(None).await.unwrap_err();
        assert!(
            matches!(err, ConformanceError::Protocol(ProtocolError::Verification(ref m)) if m.contains("type")),
            "{err}"
        );
    }
}
