//! FDO conformance engine.
//!
//! This crate provides:
//! - **Registry**: every conformance check as a [`TestId`], scoped to one
//!   message and one fault category, plus the per-message queues
//! - **Fault injection**: mutators that corrupt encodings, nonces, hashes,
//!   signatures and encryption envelopes
//! - **Requestors**: client-role TO0, TO1 and TO2 state machines that play a
//!   correct or faulted message per step and judge the reply
//! - **Listener**: a scripted rendezvous and owner server that serves
//!   faulted replies to a device under test and records what happened
//! - **Orchestrator**: campaign registration, run lifecycle and history
//!
//! All state lives behind the store traits in [`store`], wired to one
//! [`fdo_store::KvStore`] by [`store::Stores::over`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod fuzz;
pub mod listener;
pub mod matcher;
pub mod orchestrator;
pub mod registry;
pub mod requestor;
pub mod store;

pub use error::{ConformanceError, ConformanceResult};
pub use listener::{Listener, ListenerConfig, Reply};
pub use matcher::TestOutcome;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use registry::{FaultCategory, TestGroup, TestId};
pub use requestor::{StepOutcome, To0Requestor, To1Requestor, To2Config, To2Requestor};
pub use store::{Campaign, Stores, TestRun};
