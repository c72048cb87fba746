//! Listener instances: a device under test drives this tool.
//!
//! Each instance owns the voucher the device was provisioned with and one
//! [`ListenerRunner`] per protocol direction the device speaks (TO1, TO2).

use crate::error::{ConformanceError, ConformanceResult};
use crate::matcher::TestOutcome;
use crate::registry::{TestId, listener_cmds, listener_tests};
use crate::store::results::TestRun;
use crate::store::voucher::VoucherRecord;
use async_trait::async_trait;
use fdo_protocol::{Cmd, Guid, Protocol};
use fdo_store::keyspace::{LISTENER_TTL, listener_guid_key, listener_key};
use fdo_store::{KvStore, StoreError, WriteBatch, get_entity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sequencing and result state for one protocol direction.
///
/// The device must walk the requests of [`listener_cmds`] in order. For the
/// expected request the runner hands out the next identity of that request's
/// queue. A negative identity stays pending until the device's next move
/// decides it: coming back to the expected request (after restarting the
/// protocol) passes it, moving on to a later request fails it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRunner {
    pub protocol: Protocol,
    /// `None` once every request has been completed.
    pub expected_cmd: Option<Cmd>,
    #[serde(default)]
    pub completed_cmds: Vec<Cmd>,
    pub tests: BTreeMap<Cmd, Vec<TestId>>,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub last_test_id: Option<TestId>,
    /// Negative identity served and not yet judged.
    #[serde(default)]
    pub pending: Option<TestId>,
    pub current_run: TestRun,
    /// Most recent first.
    #[serde(default)]
    pub history: Vec<TestRun>,
}

impl ListenerRunner {
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        let cmds = listener_cmds(protocol);
        Self {
            protocol,
            expected_cmd: cmds.first().copied(),
            completed_cmds: Vec::new(),
            tests: cmds
                .iter()
                .map(|cmd| (*cmd, listener_tests(*cmd).to_vec()))
                .collect(),
            current_index: 0,
            last_test_id: None,
            pending: None,
            current_run: TestRun::new(),
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_completed(&self, cmd: Cmd) -> bool {
        self.completed_cmds.contains(&cmd)
    }

    /// Every request has passed its positive identity.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.expected_cmd.is_none()
    }

    /// Judge the pending identity against `cmd` and pick the identity to
    /// serve for it.
    ///
    /// Returns `None` when `cmd` is answered without any fault: it is already
    /// completed, or it is not the request under test.
    pub fn begin(&mut self, cmd: Cmd) -> Option<TestId> {
        if self.is_completed(cmd) {
            return None;
        }
        let expected = self.expected_cmd?;
        if cmd != expected {
            if let Some(id) = self.pending.take() {
                self.current_run.report(
                    id,
                    TestOutcome::fail(format!(
                        "expected the device to restart and send {expected}, got {cmd}"
                    )),
                );
            }
            return None;
        }

        if let Some(id) = self.pending.take() {
            self.current_run.report(id, TestOutcome::pass());
        }
        let queue = self.tests.get(&cmd)?;
        // a failed positive is retried rather than running off the queue
        let id = *queue
            .get(self.current_index)
            .or_else(|| queue.last())?;
        self.current_index += 1;
        self.last_test_id = Some(id);
        if id.is_negative() {
            self.pending = Some(id);
        }
        debug!(protocol = %self.protocol, cmd = %cmd, test_id = %id, "listener test selected");
        Some(id)
    }

    /// The positive identity for `cmd` was served: record it and move on.
    pub fn complete(&mut self, cmd: Cmd) {
        if self.expected_cmd != Some(cmd) {
            return;
        }
        if let Some(id) = self.last_test_id.filter(|id| id.is_positive()) {
            self.current_run.report(id, TestOutcome::pass());
        }
        self.completed_cmds.push(cmd);
        let cmds = listener_cmds(self.protocol);
        self.expected_cmd = cmds
            .iter()
            .position(|c| *c == cmd)
            .and_then(|i| cmds.get(i + 1))
            .copied();
        self.current_index = 0;
        self.pending = None;
        if self.is_finished() {
            info!(protocol = %self.protocol, run = %self.current_run.id, "listener run completed");
        }
    }

    /// The exchange for the identity just selected failed on our side.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.pending = None;
        if let Some(id) = self.last_test_id {
            self.current_run.report(id, TestOutcome::fail(error));
        }
    }

    /// Record an outcome for an identity other than the one being served.
    pub fn record(&mut self, id: TestId, outcome: TestOutcome) {
        self.current_run.report(id, outcome);
    }

    /// Archive the current run and reset sequencing for a fresh one.
    pub fn start_new_run(&mut self) {
        let fresh = Self::new(self.protocol);
        let previous = std::mem::replace(&mut self.current_run, fresh.current_run);
        if !previous.results.is_empty() {
            self.history.insert(0, previous);
        }
        self.expected_cmd = fresh.expected_cmd;
        self.completed_cmds = fresh.completed_cmds;
        self.tests = fresh.tests;
        self.current_index = 0;
        self.last_test_id = None;
        self.pending = None;
    }

    /// Drop a run, historical or in flight. Returns whether it existed.
    pub fn remove_test_run(&mut self, run: &Uuid) -> bool {
        if self.current_run.id == *run {
            self.current_run = TestRun::new();
            return true;
        }
        let before = self.history.len();
        self.history.retain(|r| r.id != *run);
        self.history.len() != before
    }
}

/// A device under test and its per-protocol runners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerInstance {
    pub id: Uuid,
    pub guid: Guid,
    pub voucher: VoucherRecord,
    pub to1: ListenerRunner,
    pub to2: ListenerRunner,
}

impl ListenerInstance {
    #[must_use]
    pub fn new(voucher: VoucherRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            guid: voucher.guid,
            voucher,
            to1: ListenerRunner::new(Protocol::To1),
            to2: ListenerRunner::new(Protocol::To2),
        }
    }

    /// Runner for `protocol`; TO0 is never device driven.
    #[must_use]
    pub const fn runner(&self, protocol: Protocol) -> Option<&ListenerRunner> {
        match protocol {
            Protocol::To0 => None,
            Protocol::To1 => Some(&self.to1),
            Protocol::To2 => Some(&self.to2),
        }
    }

    pub fn runner_mut(&mut self, protocol: Protocol) -> Option<&mut ListenerRunner> {
        match protocol {
            Protocol::To0 => None,
            Protocol::To1 => Some(&mut self.to1),
            Protocol::To2 => Some(&mut self.to2),
        }
    }
}

/// Listener instance persistence with a device GUID index.
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// Store a new instance and point its GUID at it.
    ///
    /// # Errors
    /// Store failures; nothing is written on error.
    async fn save(&self, instance: &ListenerInstance) -> ConformanceResult<()>;

    /// Overwrite an existing instance.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] if it was deleted or expired.
    async fn update(&self, instance: &ListenerInstance) -> ConformanceResult<()>;

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown ids.
    async fn get(&self, id: &Uuid) -> ConformanceResult<ListenerInstance>;

    /// The instance testing `guid`, if any.
    ///
    /// # Errors
    /// Store failures.
    async fn get_by_guid(&self, guid: &Guid) -> ConformanceResult<Option<ListenerInstance>>;

    /// # Errors
    /// Store failures.
    async fn delete(&self, id: &Uuid) -> ConformanceResult<bool>;

    /// Drop one run of `protocol`. Returns whether it existed.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown ids.
    async fn remove_test_run(
        &self,
        id: &Uuid,
        protocol: Protocol,
        run: &Uuid,
    ) -> ConformanceResult<bool>;
}

pub struct KvListenerStore {
    kv: Arc<dyn KvStore>,
}

impl KvListenerStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl ListenerStore for KvListenerStore {
    async fn save(&self, instance: &ListenerInstance) -> ConformanceResult<()> {
        let mut batch = WriteBatch::new();
        batch
            .set(
                listener_key(&instance.id),
                fdo_cbor::to_vec(instance)?,
                Some(LISTENER_TTL),
            )
            .set(
                listener_guid_key(instance.guid.as_bytes()),
                instance.id.as_bytes().to_vec(),
                Some(LISTENER_TTL),
            );
        self.kv.commit(batch).await?;
        info!(listener = %instance.id, guid = %instance.guid, "listener instance created");
        Ok(())
    }

    async fn update(&self, instance: &ListenerInstance) -> ConformanceResult<()> {
        let bytes = fdo_cbor::to_vec(instance)?;
        let result = self
            .kv
            .update(
                &listener_key(&instance.id),
                Some(LISTENER_TTL),
                Box::new(move |current| match current {
                    Some(_) => Ok(bytes),
                    None => Err(StoreError::NotFound("listener".into())),
                }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ConformanceError::not_found(format!(
                "listener {}",
                instance.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &Uuid) -> ConformanceResult<ListenerInstance> {
        get_entity(self.kv.as_ref(), &listener_key(id))
            .await?
            .ok_or_else(|| ConformanceError::not_found(format!("listener {id}")))
    }

    async fn get_by_guid(&self, guid: &Guid) -> ConformanceResult<Option<ListenerInstance>> {
        let Some(raw) = self.kv.get(&listener_guid_key(guid.as_bytes())).await? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&raw)
            .map_err(|e| ConformanceError::Store(StoreError::Backend(e.to_string())))?;
        Ok(get_entity(self.kv.as_ref(), &listener_key(&id)).await?)
    }

    async fn delete(&self, id: &Uuid) -> ConformanceResult<bool> {
        let Some(instance) = get_entity::<ListenerInstance>(self.kv.as_ref(), &listener_key(id)).await?
        else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        batch
            .delete(listener_key(id))
            .delete(listener_guid_key(instance.guid.as_bytes()));
        self.kv.commit(batch).await?;
        Ok(true)
    }

    async fn remove_test_run(
        &self,
        id: &Uuid,
        protocol: Protocol,
        run: &Uuid,
    ) -> ConformanceResult<bool> {
        let mut instance = self.get(id).await?;
        let removed = instance
            .runner_mut(protocol)
            .is_some_and(|runner| runner.remove_test_run(run));
        if !removed {
            warn!(listener = %id, %protocol, run = %run, "test run not found");
            return Ok(false);
        }
        self.update(&instance).await?;
        Ok(true)
    }
}
