//! Transfer Ownership Protocol 1 (TO1).
//!
//! The device asks the rendezvous server where its new owner lives: HelloRV
//! (30), HelloRVAck (31) with a nonce, ProveToRV (32) signing that nonce with
//! the device key, RVRedirect (33) returning the owner's signed `to1d`.

pub mod hello_rv;
pub mod hello_rv_ack;
pub mod prove_to_rv;
pub mod rv_redirect;

pub use hello_rv::HelloRv;
pub use hello_rv_ack::HelloRvAck;
pub use prove_to_rv::ProveToRv;
pub use rv_redirect::RvRedirect;
