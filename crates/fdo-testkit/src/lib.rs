//! FDO Test Kit - shared test infrastructure for the FDO conformance crates.
//!
//! - [`init_test_tracing`] - once-guarded tracing for test output
//! - [`MockIut`] - wiremock-backed FDO peer with scripted replies
//! - [`fixtures`] - vouchers, in-memory stores and a manual clock
//! - [`spawn_listener`] - the scripted listener on a loopback port
//!
//! # Example
//!
//! ```rust,ignore
//! use fdo_testkit::{fixtures, spawn_listener};
//!
//! #[tokio::test]
//! async fn device_onboards() {
//!     fdo_testkit::init_test_tracing();
//!     let stores = fixtures::memory_stores();
//!     let running = spawn_listener(Listener::new(stores, ListenerConfig::default())).await;
//!     // point a requestor at running.base_url()
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod fixtures;
mod listener;
mod mock_iut;
mod tracing_config;

pub use listener::{RunningListener, spawn_listener};
pub use mock_iut::MockIut;
pub use tracing_config::*;
