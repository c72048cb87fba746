//! TO0: register an owner with a rendezvous server.

use super::{StepOutcome, fault_for, negative_for, passes_at, send_faulted};
use crate::error::{ConformanceError, ConformanceResult};
use crate::fuzz::{fuzz_signature, random_buffer_fuzz, random_hash_fault, random_value};
use crate::matcher::{TestOutcome, check_response};
use crate::registry::{FaultCategory, TestId};
use fdo_cbor::value::bstr;
use fdo_cbor::{CborCodec, Value};
use fdo_crypto::cose;
use fdo_crypto::hash::FdoHash;
use fdo_protocol::to0::{AcceptOwner, Hello, HelloAck, OwnerSign, To0d, To1dPayload};
use fdo_protocol::transport::FdoClient;
use fdo_protocol::types::RvTo2Addr;
use fdo_protocol::voucher::{GeneratedVoucher, VoucherBuilder};
use fdo_protocol::{Cmd, Nonce, ProtocolError};
use tracing::{debug, instrument, warn};

/// Owner side of TO0 for one voucher.
#[derive(Debug)]
pub struct To0Requestor {
    client: FdoClient,
    voucher: GeneratedVoucher,
    owner_addrs: Vec<RvTo2Addr>,
    wait_seconds: u32,
    token: Option<String>,
}

impl To0Requestor {
    /// `owner_addrs` is where devices will be redirected to for TO2.
    #[must_use]
    pub fn new(
        client: FdoClient,
        voucher: GeneratedVoucher,
        owner_addrs: Vec<RvTo2Addr>,
        wait_seconds: u32,
    ) -> Self {
        Self {
            client,
            voucher,
            owner_addrs,
            wait_seconds,
            token: None,
        }
    }

    /// `TO0.Hello` (20) and its `HelloAck` (21).
    ///
    /// # Errors
    /// Transport failures and malformed or error replies.
    #[instrument(skip(self), fields(guid = %self.voucher.credential.guid))]
    pub async fn hello20(&mut self, test: Option<TestId>) -> ConformanceResult<StepOutcome<HelloAck>> {
        let body = Hello.to_bytes()?;
        if let Some(id) = negative_for(test, Cmd::To0Hello) {
            return send_faulted(&self.client, id, Cmd::To0Hello, random_buffer_fuzz(&body), None)
                .await;
        }

        let response = self.client.send(Cmd::To0Hello, body, None).await?;
        let token = response.token.clone();
        let decoded = response
            .expect(Cmd::To0HelloAck)
            .and_then(|b| Ok(HelloAck::from_bytes(&b)?));
        if let Some(id) = check_resp_for(test, Cmd::To0Hello) {
            return Ok(StepOutcome::Judged(check_response(id, &decoded)));
        }

        let ack = decoded?;
        self.token = Some(token.ok_or_else(|| {
            ProtocolError::BadSession("HelloAck carried no Authorization token".into())
        })?);
        debug!("rendezvous acknowledged hello");
        Ok(StepOutcome::Continue(ack))
    }

    /// `TO0.OwnerSign` (22) and its `AcceptOwner` (23).
    ///
    /// `VOUCHER` identities swap in a freshly generated voucher carrying that
    /// defect, signed by its own final owner key.
    ///
    /// # Errors
    /// [`ConformanceError::OutOfOrder`] before [`Self::hello20`], transport
    /// failures and malformed or error replies.
    #[instrument(skip(self, nonce), fields(guid = %self.voucher.credential.guid))]
    pub async fn owner_sign22(
        &mut self,
        nonce: Nonce,
        test: Option<TestId>,
    ) -> ConformanceResult<StepOutcome<AcceptOwner>> {
        let token = self.token.clone().ok_or(ConformanceError::OutOfOrder {
            state: "start",
            step: "OwnerSign22",
        })?;
        let fault = fault_for(test, Cmd::To0OwnerSign);

        let faulted_voucher;
        let generated = match fault.and_then(TestId::voucher_fault) {
            Some(voucher_fault) => {
                faulted_voucher = VoucherBuilder::new(self.voucher.credential.rv_info.clone())
                    .fault(Some(voucher_fault))
                    .build()?;
                &faulted_voucher
            }
            None => &self.voucher,
        };

        let to0d = To0d {
            voucher: generated.voucher.clone(),
            wait_seconds: self.wait_seconds,
            nonce_to0_sign: if fault == Some(TestId::Rvt22BadTo0SignNonce) {
                Nonce::random()
            } else {
                nonce
            },
        };
        let mut to0d_bytes = to0d.to_bytes()?;
        if fault == Some(TestId::Rvt22BadTo0dEncoding) {
            to0d_bytes = random_buffer_fuzz(&to0d_bytes);
        }

        let hash_type = generated.voucher.header_hmac.hash_type.to_digest();
        let mut to0d_hash = FdoHash::digest(hash_type, &to0d_bytes);
        if fault == Some(TestId::Rvt22BadTo0dHash) {
            to0d_hash = random_hash_fault(&to0d_hash, &to0d_bytes, None)?;
        }
        let to1d_payload = To1dPayload {
            addrs: self.owner_addrs.clone(),
            to0d_hash,
        };
        let mut to1d = cose::sign1(
            to1d_payload.to_bytes()?,
            &generated.owner_key,
            cose::no_headers(),
        );
        if fault == Some(TestId::Rvt22BadSignature) {
            to1d = fuzz_signature(to1d);
        }

        let message = OwnerSign {
            to0d: to0d_bytes,
            to1d,
        };
        let body = match fault {
            Some(TestId::Rvt22BadEncoding) => random_buffer_fuzz(&message.to_bytes()?),
            Some(TestId::Rvt22BadOwnerSignEncoding) => fdo_cbor::encode_value(&Value::Array(
                vec![bstr(message.to0d.clone()), random_value(2)],
            ))?,
            _ => message.to_bytes()?,
        };

        if let Some(id) = negative_for(test, Cmd::To0OwnerSign) {
            return send_faulted(&self.client, id, Cmd::To0OwnerSign, body, Some(&token)).await;
        }

        let response = self
            .client
            .send(Cmd::To0OwnerSign, body, Some(&token))
            .await?;
        let decoded = response
            .expect(Cmd::To0AcceptOwner)
            .and_then(|b| Ok(AcceptOwner::from_bytes(&b)?));
        if let Some(id) = check_resp_for(test, Cmd::To0OwnerSign) {
            return Ok(StepOutcome::Judged(check_response(id, &decoded)));
        }

        let accept = decoded?;
        if accept.wait_seconds > self.wait_seconds {
            warn!(
                requested = self.wait_seconds,
                granted = accept.wait_seconds,
                "rendezvous granted more than the requested wait"
            );
        }
        self.token = None;
        debug!(wait_seconds = accept.wait_seconds, "owner registered");
        Ok(StepOutcome::Continue(accept))
    }

    /// Run the flow far enough to decide `test`.
    ///
    /// # Errors
    /// Any step error; the caller records it as a failure.
    pub async fn run(&mut self, test: Option<TestId>) -> ConformanceResult<TestOutcome> {
        let ack = try_step!(self.hello20(test).await?);
        if passes_at(test, Cmd::To0Hello) {
            return Ok(TestOutcome::pass());
        }
        try_step!(self.owner_sign22(ack.nonce_to0_sign, test).await?);
        Ok(TestOutcome::pass())
    }

    /// Both steps with no fault: register the voucher.
    ///
    /// # Errors
    /// As for the individual steps.
    pub async fn register(&mut self) -> ConformanceResult<AcceptOwner> {
        let ack = expect_continue(self.hello20(None).await?)?;
        expect_continue(self.owner_sign22(ack.nonce_to0_sign, None).await?)
    }
}

fn check_resp_for(test: Option<TestId>, request: Cmd) -> Option<TestId> {
    fault_for(test, request).filter(|id| id.category() == FaultCategory::CheckResponse)
}

/// Unwrap a step that ran without any identity.
pub(crate) fn expect_continue<T>(outcome: StepOutcome<T>) -> ConformanceResult<T> {
    match outcome {
        StepOutcome::Continue(v) => Ok(v),
        StepOutcome::Judged(o) => Err(ConformanceError::Invalid(format!(
            "unfaulted step was judged: {}",
            o.error.unwrap_or_default()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_protocol::transport::{ClientConfig, MESSAGE_TYPE_HEADER};
    use fdo_protocol::types::RendezvousInfo;
    use fdo_protocol::{ErrorMessage, FdoErrorCode};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generated() -> GeneratedVoucher {
        VoucherBuilder::new(RendezvousInfo::from_urls(&["http://rv.example"]).unwrap())
            .entry_count(2)
            .build()
            .unwrap()
    }

    async fn requestor(server: &MockServer) -> To0Requestor {
        To0Requestor::new(
            FdoClient::new(server.uri(), &ClientConfig::default()).unwrap(),
            generated(),
            vec![RvTo2Addr::from_url("http://owner.example:8042").unwrap()],
            3600,
        )
    }

    async fn mount_hello(server: &MockServer, nonce: Nonce) {
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/20"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(MESSAGE_TYPE_HEADER, "21")
                    .insert_header("Authorization", "Bearer to0-token")
                    .set_body_bytes(HelloAck { nonce_to0_sign: nonce }.to_bytes().unwrap()),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn registers_and_reads_granted_wait() {
        let server = MockServer::start().await;
        mount_hello(&server, Nonce::random()).await;
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/22"))
            .and(header("authorization", "Bearer to0-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(MESSAGE_TYPE_HEADER, "23")
                    .set_body_bytes(AcceptOwner { wait_seconds: 1800 }.to_bytes().unwrap()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut to0 = requestor(&server).await;
        let accept = to0.register().await.unwrap();
        assert_eq!(accept.wait_seconds, 1800);
    }

    #[tokio::test]
    async fn owner_sign_before_hello_is_out_of_order() {
        let server = MockServer::start().await;
        let mut to0 = requestor(&server).await;
        let err = to0.owner_sign22(Nonce::random(), None).await.unwrap_err();
        assert!(matches!(err, ConformanceError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn rejected_bad_signature_passes() {
        let server = MockServer::start().await;
        mount_hello(&server, Nonce::random()).await;
        let err = ErrorMessage::new(FdoErrorCode::InvalidMessageError, Cmd::To0OwnerSign, "sig");
        Mock::given(method("POST"))
            .and(path("/fdo/101/msg/22"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header(MESSAGE_TYPE_HEADER, "255")
                    .set_body_bytes(err.to_bytes().unwrap()),
            )
            .mount(&server)
            .await;

        let mut to0 = requestor(&server).await;
        let ack = expect_continue(to0.hello20(None).await.unwrap()).unwrap();
        let outcome = to0
            .owner_sign22(ack.nonce_to0_sign, Some(TestId::Rvt22BadSignature))
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Judged(crate::matcher::TestOutcome::pass()));
    }

    #[tokio::test]
    async fn check_resp_fails_on_error_reply() {
        let server = MockServer::start().await;
        let err = ErrorMessage::new(FdoErrorCode::InternalServerError, Cmd::To0Hello, "down");
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .insert_header(MESSAGE_TYPE_HEADER, "255")
                    .set_body_bytes(err.to_bytes().unwrap()),
            )
            .mount(&server)
            .await;

        let mut to0 = requestor(&server).await;
        match to0.hello20(Some(TestId::Rvt21CheckResp)).await.unwrap() {
            StepOutcome::Judged(outcome) => assert!(!outcome.passed),
            StepOutcome::Continue(_) => panic!("check identity must be judged"),
        }
    }
}
