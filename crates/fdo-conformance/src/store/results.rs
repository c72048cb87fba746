//! Request campaigns and their test runs.

use crate::error::{ConformanceError, ConformanceResult};
use crate::matcher::TestOutcome;
use crate::registry::TestId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fdo_protocol::{Guid, Protocol};
use fdo_store::keyspace::{CAMPAIGN_TTL, campaign_key, campaign_prefix};
use fdo_store::{KvStore, get_entity, set_entity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One execution of a campaign's identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub results: BTreeMap<TestId, TestOutcome>,
}

impl TestRun {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            results: BTreeMap::new(),
        }
    }

    /// Record an outcome, replacing any earlier one for `id`.
    pub fn report(&mut self, id: TestId, outcome: TestOutcome) {
        self.results.insert(id, outcome);
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.values().all(|o| o.passed)
    }

    #[must_use]
    pub fn failures(&self) -> Vec<(TestId, &TestOutcome)> {
        self.results
            .iter()
            .filter(|(_, o)| !o.passed)
            .map(|(id, o)| (*id, o))
            .collect()
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered target and protocol direction (`RequestTestInst`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub target: String,
    pub protocol: Protocol,
    /// Devices whose vouchers this campaign may use.
    pub seeds: Vec<Guid>,
    /// Faulted devices of a TO2 campaign, one per voucher identity.
    #[serde(default)]
    pub test_vouchers: BTreeMap<TestId, Guid>,
    #[serde(default)]
    pub in_progress: bool,
    /// Most recent first; the head is the current run while in progress.
    #[serde(default)]
    pub runs: Vec<TestRun>,
}

impl Campaign {
    #[must_use]
    pub fn new(target: impl Into<String>, protocol: Protocol, seeds: Vec<Guid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            protocol,
            seeds,
            test_vouchers: BTreeMap::new(),
            in_progress: false,
            runs: Vec::new(),
        }
    }

    #[must_use]
    pub fn current_run(&self) -> Option<&TestRun> {
        self.runs.first()
    }
}

/// Campaign persistence.
///
/// Every mutation loads the campaign, changes it and writes it back whole;
/// concurrent writers race with last-writer-wins.
#[async_trait]
pub trait TestResultStore: Send + Sync {
    /// # Errors
    /// Store failures.
    async fn create(&self, campaign: &Campaign) -> ConformanceResult<()>;

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    async fn get(&self, id: &Uuid) -> ConformanceResult<Campaign>;

    /// # Errors
    /// Store failures.
    async fn list(&self) -> ConformanceResult<Vec<Campaign>>;

    /// Push a fresh run to the front of history and mark the campaign in progress.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    async fn start_new_run(&self, id: &Uuid) -> ConformanceResult<Uuid>;

    /// Write `outcome` into the current run.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns or a campaign
    /// without runs.
    async fn report_test(&self, id: &Uuid, test: TestId, outcome: TestOutcome) -> ConformanceResult<()>;

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    async fn finish_run(&self, id: &Uuid) -> ConformanceResult<()>;

    /// Drop one run from history. Returns whether it existed.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    async fn remove_test_run(&self, id: &Uuid, run: &Uuid) -> ConformanceResult<bool>;

    /// # Errors
    /// Store failures.
    async fn delete(&self, id: &Uuid) -> ConformanceResult<bool>;
}

pub struct KvTestResultStore {
    kv: Arc<dyn KvStore>,
}

impl KvTestResultStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn save(&self, campaign: &Campaign) -> ConformanceResult<()> {
        Ok(set_entity(
            self.kv.as_ref(),
            &campaign_key(&campaign.id),
            campaign,
            Some(CAMPAIGN_TTL),
        )
        .await?)
    }
}

#[async_trait]
impl TestResultStore for KvTestResultStore {
    async fn create(&self, campaign: &Campaign) -> ConformanceResult<()> {
        self.save(campaign).await?;
        info!(campaign = %campaign.id, target = %campaign.target, protocol = %campaign.protocol, "campaign registered");
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> ConformanceResult<Campaign> {
        get_entity(self.kv.as_ref(), &campaign_key(id))
            .await?
            .ok_or_else(|| ConformanceError::not_found(format!("campaign {id}")))
    }

    async fn list(&self) -> ConformanceResult<Vec<Campaign>> {
        self.kv
            .scan_prefix(&campaign_prefix())
            .await?
            .into_iter()
            .map(|(_, bytes)| Ok(fdo_cbor::from_slice(&bytes)?))
            .collect()
    }

    async fn start_new_run(&self, id: &Uuid) -> ConformanceResult<Uuid> {
        let mut campaign = self.get(id).await?;
        let run = TestRun::new();
        let run_id = run.id;
        campaign.runs.insert(0, run);
        campaign.in_progress = true;
        self.save(&campaign).await?;
        info!(campaign = %id, run = %run_id, "test run started");
        Ok(run_id)
    }

    async fn report_test(&self, id: &Uuid, test: TestId, outcome: TestOutcome) -> ConformanceResult<()> {
        let mut campaign = self.get(id).await?;
        let run = campaign
            .runs
            .first_mut()
            .ok_or_else(|| ConformanceError::not_found(format!("current run of campaign {id}")))?;
        run.report(test, outcome);
        self.save(&campaign).await
    }

    async fn finish_run(&self, id: &Uuid) -> ConformanceResult<()> {
        let mut campaign = self.get(id).await?;
        campaign.in_progress = false;
        self.save(&campaign).await?;
        info!(campaign = %id, "test run finished");
        Ok(())
    }

    async fn remove_test_run(&self, id: &Uuid, run: &Uuid) -> ConformanceResult<bool> {
        let mut campaign = self.get(id).await?;
        let before = campaign.runs.len();
        campaign.runs.retain(|r| r.id != *run);
        if campaign.runs.len() == before {
            warn!(campaign = %id, run = %run, "test run not found");
            return Ok(false);
        }
        self.save(&campaign).await?;
        Ok(true)
    }

    async fn delete(&self, id: &Uuid) -> ConformanceResult<bool> {
        Ok(self.kv.delete(&campaign_key(id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_store::{MemoryKvStore, MemoryStoreConfig};

    fn store() -> KvTestResultStore {
        KvTestResultStore::new(Arc::new(MemoryKvStore::new(MemoryStoreConfig::default())))
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let store = store();
        let campaign = Campaign::new("http://sut.example", Protocol::To2, vec![Guid::random()]);
        store.create(&campaign).await.unwrap();

        let first = store.start_new_run(&campaign.id).await.unwrap();
        assert!(store.get(&campaign.id).await.unwrap().in_progress);
        store
            .report_test(&campaign.id, TestId::Dot60Positive, TestOutcome::pass())
            .await
            .unwrap();
        store.finish_run(&campaign.id).await.unwrap();

        let second = store.start_new_run(&campaign.id).await.unwrap();
        let loaded = store.get(&campaign.id).await.unwrap();
        assert_eq!(loaded.runs[0].id, second);
        assert_eq!(loaded.runs[1].id, first);
        assert!(loaded.runs[0].results.is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reporting_twice_overwrites() {
        let store = store();
        let campaign = Campaign::new("http://sut.example", Protocol::To0, Vec::new());
        store.create(&campaign).await.unwrap();
        store.start_new_run(&campaign.id).await.unwrap();
        store
            .report_test(&campaign.id, TestId::Rvt20Positive, TestOutcome::fail("timeout"))
            .await
            .unwrap();
        store
            .report_test(&campaign.id, TestId::Rvt20Positive, TestOutcome::pass())
            .await
            .unwrap();

        let run = store.get(&campaign.id).await.unwrap().runs.remove(0);
        assert_eq!(run.results.len(), 1);
        assert!(run.results[&TestId::Rvt20Positive].passed);
    }

    #[tokio::test]
    async fn removing_unknown_run_leaves_campaign_unchanged() {
        let store = store();
        let campaign = Campaign::new("http://sut.example", Protocol::To1, Vec::new());
        store.create(&campaign).await.unwrap();
        let run = store.start_new_run(&campaign.id).await.unwrap();
        let before = store.get(&campaign.id).await.unwrap();

        assert!(!store.remove_test_run(&campaign.id, &Uuid::new_v4()).await.unwrap());
        assert_eq!(store.get(&campaign.id).await.unwrap(), before);

        assert!(store.remove_test_run(&campaign.id, &run).await.unwrap());
        assert!(store.get(&campaign.id).await.unwrap().runs.is_empty());
    }

    #[tokio::test]
    async fn report_without_run_is_not_found() {
        let store = store();
        let campaign = Campaign::new("http://sut.example", Protocol::To1, Vec::new());
        store.create(&campaign).await.unwrap();
        assert!(matches!(
            store
                .report_test(&campaign.id, TestId::Devt30Positive, TestOutcome::pass())
                .await,
            Err(ConformanceError::NotFound(_))
        ));
        assert!(matches!(
            store.get(&Uuid::new_v4()).await,
            Err(ConformanceError::NotFound(_))
        ));
    }
}
