//! Storage for FDO conformance state.
//!
//! The engine consumes storage through [`KvStore`]: get/set with TTL, delete,
//! prefix scan, atomic batch commit and single-key read-modify-write.
//! [`MemoryKvStore`] is the in-process implementation; its expiry follows an
//! injectable [`Clock`] so TTL behavior is testable with [`ManualClock`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod error;
pub mod keyspace;
pub mod kv;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use kv::{KvStore, UpdateFn, WriteBatch, WriteOp, get_entity, set_entity};
pub use memory::{MemoryKvStore, MemoryStoreConfig};
