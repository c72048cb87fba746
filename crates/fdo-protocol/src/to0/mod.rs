//! Transfer Ownership Protocol 0 (TO0).
//!
//! The owner registers a voucher with the rendezvous server: Hello (20),
//! HelloAck (21) carrying a nonce, OwnerSign (22) binding that nonce to the
//! voucher and the signed `to1d` redirect blob, AcceptOwner (23).

pub mod accept_owner;
pub mod hello;
pub mod hello_ack;
pub mod owner_sign;

pub use accept_owner::AcceptOwner;
pub use hello::Hello;
pub use hello_ack::HelloAck;
pub use owner_sign::{OwnerSign, To0d, To1dPayload};
