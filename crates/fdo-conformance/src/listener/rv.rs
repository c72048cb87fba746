//! Rendezvous role: TO0 registration and TO1 redirect.

use super::{Handled, Listener, in_session};
use crate::error::ConformanceResult;
use crate::fuzz::{fuzz_signature, random_buffer_fuzz};
use crate::registry::TestId;
use crate::store::{RvRegistration, Session};
use chrono::Utc;
use coset::CoseSign1;
use fdo_cbor::CborCodec;
use fdo_crypto::cose;
use fdo_crypto::keys::spki_to_verifying_key;
use fdo_protocol::to0::{AcceptOwner, Hello, HelloAck, OwnerSign, To0d};
use fdo_protocol::to1::{HelloRv, HelloRvAck, ProveToRv, RvRedirect};
use fdo_protocol::types::RvTo2Addr;
use fdo_protocol::voucher::OwnershipVoucher;
use fdo_protocol::{Cmd, Nonce, Protocol, ProtocolError};
use tracing::{debug, info};

/// Check a device signature against the leaf of the voucher's device
/// certificate chain.
pub(super) fn verify_device(voucher: &OwnershipVoucher, signed: &CoseSign1) -> ConformanceResult<()> {
    let leaf = voucher
        .dev_cert_chain
        .as_ref()
        .and_then(|chain| chain.first())
        .ok_or_else(|| {
            ProtocolError::Verification("voucher carries no device certificate chain".into())
        })?;
    cose::verify_sign1(signed, &spki_to_verifying_key(leaf)?)?;
    Ok(())
}

impl Listener {
    pub(super) async fn rendezvous(
        &self,
        cmd: Cmd,
        session: Option<Session>,
        body: &[u8],
        fault: Option<TestId>,
    ) -> ConformanceResult<Handled> {
        match cmd {
            Cmd::To0Hello => hello20(body),
            Cmd::To0OwnerSign => self.owner_sign22(in_session(session)?, body).await,
            Cmd::To1HelloRv => self.hello_rv30(body, fault).await,
            Cmd::To1ProveToRv => self.prove_to_rv32(in_session(session)?, body, fault).await,
            other => Err(ProtocolError::Decode(format!("message {other} is not a rendezvous request")).into()),
        }
    }

    async fn owner_sign22(&self, mut session: Session, body: &[u8]) -> ConformanceResult<Handled> {
        let message = OwnerSign::from_bytes(body)?;
        let to0d = message.decode_to0d()?;
        let to1d = message.decode_to1d()?;
        if to1d.addrs.is_empty() || !to1d.addrs.iter().all(RvTo2Addr::has_host) {
            return Err(ProtocolError::Decode("to1d names an owner address without IP or DNS".into()).into());
        }
        if to0d.nonce_to0_sign != Session::required(session.nonce, "NonceTO0Sign")? {
            return Err(ProtocolError::Verification("to0d nonce does not match HelloAck".into()).into());
        }

        let owner_key = to0d
            .voucher
            .validate()
            .map_err(|e| ProtocolError::Decode(format!("invalid ownership voucher: {e}")))?;
        cose::verify_sign1(&message.to1d, &owner_key.verifying_key()?)?;
        let expected = to0d.voucher.header_hmac.hash_type.to_digest();
        if to1d.to0d_hash.hash_type != expected {
            return Err(ProtocolError::Verification(format!(
                "to0dHash is {}, voucher uses {expected}",
                to1d.to0d_hash.hash_type
            ))
            .into());
        }
        to1d
            .to0d_hash
            .verify_digest(&message.to0d)
            .map_err(|_| ProtocolError::Verification("to0dHash does not cover to0d".into()))?;

        let guid = to0d.voucher.header()?.guid;
        let registration = RvRegistration {
            to0d: message.to0d.clone(),
            to1d: cose::sign1_to_vec(&message.to1d)?,
            wait_seconds: to0d.wait_seconds,
            registered_at: Utc::now(),
        };
        self.stores.registrations.register(&guid, &registration).await?;
        let wait_seconds = RvRegistration::granted_wait(to0d.wait_seconds);
        info!(%guid, wait_seconds, "owner registered");

        session.guid = Some(guid);
        Ok(Handled::new(
            session,
            Cmd::To0AcceptOwner,
            AcceptOwner { wait_seconds }.to_bytes()?,
        ))
    }

    async fn hello_rv30(&self, body: &[u8], fault: Option<TestId>) -> ConformanceResult<Handled> {
        let hello = HelloRv::from_bytes(body)?;
        if !hello.ea_sig_info.is_supported() {
            return Err(ProtocolError::Unsupported(format!(
                "eASigInfo type {}",
                hello.ea_sig_info.sg_type
            ))
            .into());
        }
        self.stores.registrations.lookup(&hello.guid).await?;

        let nonce = Nonce::random();
        let mut session = Session::new(Protocol::To1);
        session.guid = Some(hello.guid);
        session.nonce = Some(nonce);

        let mut reply = HelloRvAck {
            nonce_to1_proof: nonce,
            eb_sig_info: hello.ea_sig_info,
        }
        .to_bytes()?;
        if fault == Some(TestId::Listener30BadEncoding) {
            reply = random_buffer_fuzz(&reply);
        }
        Ok(Handled::new(session, Cmd::To1HelloRvAck, reply))
    }

    async fn prove_to_rv32(
        &self,
        session: Session,
        body: &[u8],
        fault: Option<TestId>,
    ) -> ConformanceResult<Handled> {
        let message = ProveToRv::from_bytes(body)?;
        let eat = message.eat()?;
        let guid = session
            .guid
            .ok_or_else(|| ProtocolError::BadSession("TO1 session names no device".into()))?;
        if eat.nonce != Session::required(session.nonce, "NonceTO1Proof")? {
            return Err(ProtocolError::Verification("EAT nonce does not match HelloRVAck".into()).into());
        }
        if eat.guid() != Some(guid) {
            return Err(ProtocolError::Verification("EAT UEID names another device".into()).into());
        }

        let registration = self.stores.registrations.lookup(&guid).await?;
        let to0d = To0d::from_bytes(&registration.to0d)?;
        verify_device(&to0d.voucher, &message.0)?;

        let mut to1d = cose::sign1_from_slice(&registration.to1d)?;
        if fault == Some(TestId::Listener32BadTo1d) {
            to1d = fuzz_signature(to1d);
        }
        let mut reply = RvRedirect(to1d).to_bytes()?;
        if fault == Some(TestId::Listener32BadEncoding) {
            reply = random_buffer_fuzz(&reply);
        }
        debug!(%guid, "device redirected");
        Ok(Handled::new(session, Cmd::To1RvRedirect, reply))
    }
}

fn hello20(body: &[u8]) -> ConformanceResult<Handled> {
    Hello::from_bytes(body)?;
    let nonce = Nonce::random();
    let mut session = Session::new(Protocol::To0);
    session.nonce = Some(nonce);
    Ok(Handled::new(
        session,
        Cmd::To0HelloAck,
        HelloAck {
            nonce_to0_sign: nonce,
        }
        .to_bytes()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerConfig;
    use crate::store::Stores;
    use fdo_protocol::types::RendezvousInfo;
    use fdo_protocol::voucher::{GeneratedVoucher, VoucherBuilder};
    use fdo_protocol::FdoErrorCode;
    use fdo_crypto::hash::HashType;
    use fdo_store::{MemoryKvStore, MemoryStoreConfig};
    use std::sync::Arc;

    fn listener() -> Listener {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        Listener::new(Stores::over(kv), ListenerConfig::default())
    }

    fn generated() -> GeneratedVoucher {
        VoucherBuilder::new(RendezvousInfo::from_urls(&["http://rv.example"]).unwrap())
            .entry_count(1)
            .build()
            .unwrap()
    }

    async fn register(listener: &Listener, g: &GeneratedVoucher) -> AcceptOwner {
        let reply = listener.handle(Cmd::To0Hello, None, &Hello.to_bytes().unwrap()).await.unwrap();
        let ack = HelloAck::from_bytes(&reply.body).unwrap();
        let to0d = To0d {
            voucher: g.voucher.clone(),
            wait_seconds: 3600,
            nonce_to0_sign: ack.nonce_to0_sign,
        };
        let sign = OwnerSign::new(
            &to0d,
            vec![RvTo2Addr::from_url("http://owner.example:8042").unwrap()],
            &g.owner_key,
            HashType::Sha256,
        )
        .unwrap();
        let reply = listener
            .handle(Cmd::To0OwnerSign, reply.token.as_deref(), &sign.to_bytes().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.cmd, Cmd::To0AcceptOwner);
        AcceptOwner::from_bytes(&reply.body).unwrap()
    }

    #[tokio::test]
    async fn to0_then_to1_redirects_to_the_owner() {
        let listener = listener();
        let g = generated();
        assert_eq!(register(&listener, &g).await.wait_seconds, 3600);

        let hello = HelloRv {
            guid: g.credential.guid,
            ea_sig_info: g.credential.sig_info(),
        };
        let reply = listener.handle(Cmd::To1HelloRv, None, &hello.to_bytes().unwrap()).await.unwrap();
        let ack = HelloRvAck::from_bytes(&reply.body).unwrap();
        let proof = ProveToRv::sign(
            &g.credential.guid,
            ack.nonce_to1_proof,
            &g.credential.signing_key().unwrap(),
        )
        .unwrap();
        let reply = listener
            .handle(Cmd::To1ProveToRv, reply.token.as_deref(), &proof.to_bytes().unwrap())
            .await
            .unwrap();
        let to1d = RvRedirect::from_bytes(&reply.body).unwrap().to1d().unwrap();
        assert_eq!(to1d.addrs[0].port, 8042);
    }

    #[tokio::test]
    async fn stale_nonce_is_rejected_in_to1() {
        let listener = listener();
        let g = generated();
        register(&listener, &g).await;

        let hello = HelloRv {
            guid: g.credential.guid,
            ea_sig_info: g.credential.sig_info(),
        };
        let reply = listener.handle(Cmd::To1HelloRv, None, &hello.to_bytes().unwrap()).await.unwrap();
        let proof = ProveToRv::sign(
            &g.credential.guid,
            Nonce::random(),
            &g.credential.signing_key().unwrap(),
        )
        .unwrap();
        let err = listener
            .handle(Cmd::To1ProveToRv, reply.token.as_deref(), &proof.to_bytes().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::InvalidMessageError);
    }

    #[tokio::test]
    async fn owner_sign_with_foreign_key_is_rejected() {
        let listener = listener();
        let g = generated();
        let reply = listener.handle(Cmd::To0Hello, None, &Hello.to_bytes().unwrap()).await.unwrap();
        let ack = HelloAck::from_bytes(&reply.body).unwrap();
        let to0d = To0d {
            voucher: g.voucher.clone(),
            wait_seconds: 60,
            nonce_to0_sign: ack.nonce_to0_sign,
        };
        let stranger = fdo_crypto::keys::Es256SigningKey::generate();
        let sign = OwnerSign::new(
            &to0d,
            vec![RvTo2Addr::from_url("http://owner.example").unwrap()],
            &stranger,
            HashType::Sha256,
        )
        .unwrap();
        let err = listener
            .handle(Cmd::To0OwnerSign, reply.token.as_deref(), &sign.to_bytes().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::InvalidMessageError);
    }
    #[tokio::test]
    async fn to0d_hash_of_another_width_is_rejected() {
        let listener = listener();
        let g = generated();
        let reply = listener.handle(Cmd::To0Hello, None, &Hello.to_bytes().unwrap()).await.unwrap();
        let ack = HelloAck::from_bytes(&reply.body).unwrap();
        let to0d = To0d {
            voucher: g.voucher.clone(),
            wait_seconds: 60,
            nonce_to0_sign: ack.nonce_to0_sign,
        };
        assert_eq!(g.voucher.header_hmac.hash_type.to_digest(), HashType::Sha256);
        // a correct SHA-384 digest, but the voucher is SHA-256
        let sign = OwnerSign::new(
            &to0d,
            vec![RvTo2Addr::from_url("http://owner.example").unwrap()],
            &g.owner_key,
            HashType::Sha384,
        )
        .unwrap();
        sign.decode_to1d().unwrap().to0d_hash.verify_digest(&sign.to0d).unwrap();

        let err = listener
            .handle(Cmd::To0OwnerSign, reply.token.as_deref(), &sign.to_bytes().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FdoErrorCode::InvalidMessageError);
    }
}
