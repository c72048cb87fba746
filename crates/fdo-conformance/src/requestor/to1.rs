//! TO1: a device asks a rendezvous server where its owner is.

use super::{StepOutcome, negative_for, passes_at, send_faulted};
use crate::error::{ConformanceError, ConformanceResult};
use crate::fuzz::{fuzz_signature, random_buffer_fuzz, random_sig_info_fault};
use crate::matcher::TestOutcome;
use crate::registry::TestId;
use fdo_cbor::CborCodec;
use fdo_crypto::cose;
use fdo_protocol::eat::EatPayload;
use fdo_protocol::to0::To1dPayload;
use fdo_protocol::to1::{HelloRv, HelloRvAck, ProveToRv, RvRedirect};
use fdo_protocol::transport::FdoClient;
use fdo_protocol::voucher::DeviceCredential;
use fdo_protocol::{Cmd, Guid, Nonce, ProtocolError};
use tracing::{debug, instrument};

/// Device side of TO1.
#[derive(Debug)]
pub struct To1Requestor {
    client: FdoClient,
    credential: DeviceCredential,
    token: Option<String>,
}

impl To1Requestor {
    #[must_use]
    pub fn new(client: FdoClient, credential: DeviceCredential) -> Self {
        Self {
            client,
            credential,
            token: None,
        }
    }

    /// `TO1.HelloRV` (30) and its `HelloRVAck` (31).
    ///
    /// # Errors
    /// Transport failures and malformed or error replies.
    #[instrument(skip(self), fields(guid = %self.credential.guid))]
    pub async fn hello_rv30(&mut self, test: Option<TestId>) -> ConformanceResult<StepOutcome<HelloRvAck>> {
        let sig_info = self.credential.sig_info();
        let message = HelloRv {
            guid: if test == Some(TestId::Devt30BadUnknownGuid) {
                Guid::random()
            } else {
                self.credential.guid
            },
            ea_sig_info: if test == Some(TestId::Devt30BadSigInfo) {
                random_sig_info_fault(&sig_info)
            } else {
                sig_info.clone()
            },
        };
        let mut body = message.to_bytes()?;

        if let Some(id) = negative_for(test, Cmd::To1HelloRv) {
            if id == TestId::Devt30BadEncoding {
                body = random_buffer_fuzz(&body);
            }
            return send_faulted(&self.client, id, Cmd::To1HelloRv, body, None).await;
        }

        let response = self.client.send(Cmd::To1HelloRv, body, None).await?;
        let token = response.token.clone();
        let ack = HelloRvAck::from_bytes(&response.expect(Cmd::To1HelloRvAck)?)?;
        if ack.eb_sig_info.sg_type != sig_info.sg_type {
            return Err(ProtocolError::Decode(format!(
                "HelloRVAck eBSigInfo type {} does not echo {}",
                ack.eb_sig_info.sg_type, sig_info.sg_type
            ))
            .into());
        }
        self.token = Some(token.ok_or_else(|| {
            ProtocolError::BadSession("HelloRVAck carried no Authorization token".into())
        })?);
        Ok(StepOutcome::Continue(ack))
    }

    /// `TO1.ProveToRV` (32) and its `RVRedirect` (33).
    ///
    /// # Errors
    /// [`ConformanceError::OutOfOrder`] before [`Self::hello_rv30`], transport
    /// failures and malformed or error replies.
    #[instrument(skip(self, ack), fields(guid = %self.credential.guid))]
    pub async fn prove_to_rv32(
        &mut self,
        ack: &HelloRvAck,
        test: Option<TestId>,
    ) -> ConformanceResult<StepOutcome<To1dPayload>> {
        let token = self.token.clone().ok_or(ConformanceError::OutOfOrder {
            state: "start",
            step: "ProveToRV32",
        })?;
        let guid = self.credential.guid;
        let key = self.credential.signing_key()?;
        let nonce = if test == Some(TestId::Devt32BadTo1ProofNonce) {
            Nonce::random()
        } else {
            ack.nonce_to1_proof
        };

        let body = match test {
            Some(TestId::Devt32BadProveToRvPayloadEncoding) => {
                let eat = random_buffer_fuzz(&EatPayload::new(&guid, nonce).to_bytes()?);
                ProveToRv(cose::sign1(eat, &key, cose::no_headers())).to_bytes()?
            }
            Some(TestId::Devt32BadSignature) => {
                ProveToRv(fuzz_signature(ProveToRv::sign(&guid, nonce, &key)?.0)).to_bytes()?
            }
            Some(TestId::Devt32BadEncoding) => {
                random_buffer_fuzz(&ProveToRv::sign(&guid, nonce, &key)?.to_bytes()?)
            }
            _ => ProveToRv::sign(&guid, nonce, &key)?.to_bytes()?,
        };

        if let Some(id) = negative_for(test, Cmd::To1ProveToRv) {
            return send_faulted(&self.client, id, Cmd::To1ProveToRv, body, Some(&token)).await;
        }

        let response = self
            .client
            .send(Cmd::To1ProveToRv, body, Some(&token))
            .await?;
        let redirect = RvRedirect::from_bytes(&response.expect(Cmd::To1RvRedirect)?)?;
        let to1d = redirect.to1d()?;
        if to1d.addrs.is_empty() || !to1d.addrs.iter().all(|a| a.has_host()) {
            return Err(ProtocolError::Decode("RVRedirect names no usable owner address".into()).into());
        }
        self.token = None;
        debug!(addrs = to1d.addrs.len(), "redirect received");
        Ok(StepOutcome::Continue(to1d))
    }

    /// Run the flow far enough to decide `test`.
    ///
    /// # Errors
    /// Any step error; the caller records it as a failure.
    pub async fn run(&mut self, test: Option<TestId>) -> ConformanceResult<TestOutcome> {
        let ack = try_step!(self.hello_rv30(test).await?);
        if passes_at(test, Cmd::To1HelloRv) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.prove_to_rv32(&ack, test).await?);
        Ok(TestOutcome::pass())
    }
}
