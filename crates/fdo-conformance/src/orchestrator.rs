//! Campaign registration and execution.
//!
//! A campaign pairs a target URL with a protocol direction and the seed
//! devices this tool may present to it. Running it walks every identity from
//! [`campaign_tests`] in order, each in a fresh protocol session, and records
//! one outcome per identity. A failing identity never stops the campaign,
//! and persistence failures during a run are logged and skipped so the
//! remaining identities still execute.

use crate::error::{ConformanceError, ConformanceResult};
use crate::matcher::TestOutcome;
use crate::registry::{TestId, VOUCHER, campaign_tests};
use crate::requestor::{To0Requestor, To1Requestor, To2Config, To2Requestor};
use crate::store::{Campaign, Stores, TestRun, VoucherRecord};
use fdo_crypto::envelope::CipherSuite;
use fdo_crypto::kex::KexSuite;
use fdo_protocol::{Guid, Protocol};
use fdo_protocol::transport::{ClientConfig, FdoClient};
use fdo_protocol::types::RvTo2Addr;
use fdo_protocol::voucher::{GeneratedVoucher, VoucherBuilder};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How campaigns talk to their targets.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub client: ClientConfig,
    pub kex_suite: KexSuite,
    pub cipher_suite: CipherSuite,
    pub max_service_info_rounds: usize,
    /// Owner addresses announced in TO0 registrations.
    pub owner_urls: Vec<String>,
    /// Registration lifetime requested in TO0.
    pub wait_seconds: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let to2 = To2Config::default();
        Self {
            client: ClientConfig::default(),
            kex_suite: to2.kex_suite,
            cipher_suite: to2.cipher_suite,
            max_service_info_rounds: to2.max_service_info_rounds,
            owner_urls: vec!["http://127.0.0.1:8042".to_owned()],
            wait_seconds: 3600,
        }
    }
}

/// Runs request campaigns and keeps their history.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    stores: Stores,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub const fn new(stores: Stores, config: OrchestratorConfig) -> Self {
        Self { stores, config }
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Register `target` for `protocol`, storing the seed vouchers.
    ///
    /// # Errors
    /// [`ConformanceError::Invalid`] without seeds, and store failures.
    pub async fn register(
        &self,
        target: impl Into<String>,
        protocol: Protocol,
        seeds: &[GeneratedVoucher],
    ) -> ConformanceResult<Campaign> {
        if seeds.is_empty() {
            return Err(ConformanceError::Invalid("a campaign needs at least one seed voucher".into()));
        }
        let mut guids = Vec::with_capacity(seeds.len());
        for seed in seeds {
            self.stores.vouchers.save(&VoucherRecord::from_generated(seed)?).await?;
            guids.push(seed.credential.guid);
        }
        let mut campaign = Campaign::new(target, protocol, guids);
        if protocol == Protocol::To2 {
            campaign.test_vouchers = self.faulted_vouchers(&seeds[0]).await?;
        }
        self.stores.results.create(&campaign).await?;
        info!(campaign = %campaign.id, target = %campaign.target, %protocol, "campaign registered");
        Ok(campaign)
    }

    /// One faulted device per voucher identity, stored for the owner under
    /// test to load next to the seeds.
    async fn faulted_vouchers(&self, seed: &GeneratedVoucher) -> ConformanceResult<BTreeMap<TestId, Guid>> {
        let mut faulted = BTreeMap::new();
        for id in VOUCHER {
            let generated = VoucherBuilder::new(seed.credential.rv_info.clone())
                .entry_count(seed.voucher.entries.len())
                .fault(id.voucher_fault())
                .build()?;
            self.stores.vouchers.save(&VoucherRecord::from_generated(&generated)?).await?;
            debug!(test_id = %id, guid = %generated.credential.guid, "faulted voucher stored");
            faulted.insert(*id, generated.credential.guid);
        }
        Ok(faulted)
    }

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    pub async fn start_new_run(&self, campaign: &Uuid) -> ConformanceResult<Uuid> {
        self.stores.results.start_new_run(campaign).await
    }

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns or a campaign
    /// without a run.
    pub async fn report_test(&self, campaign: &Uuid, test: TestId, outcome: TestOutcome) -> ConformanceResult<()> {
        self.stores.results.report_test(campaign, test, outcome).await
    }

    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    pub async fn finish_run(&self, campaign: &Uuid) -> ConformanceResult<()> {
        self.stores.results.finish_run(campaign).await
    }

    /// Drop one run from a campaign's history. An absent run is reported as
    /// `false` and leaves the campaign untouched.
    ///
    /// # Errors
    /// [`ConformanceError::NotFound`] for unknown campaigns.
    pub async fn remove_test_run(&self, campaign: &Uuid, run: &Uuid) -> ConformanceResult<bool> {
        self.stores.results.remove_test_run(campaign, run).await
    }

    /// Start a run, execute every identity of the campaign and finish the run.
    ///
    /// Identities take the seeds in turn. Returns the run as executed, which
    /// may hold outcomes the store failed to persist.
    ///
    /// # Errors
    /// Failures before the first identity runs: unknown campaign, missing
    /// seed voucher or bad owner URLs.
    #[instrument(skip(self), fields(campaign = %id))]
    pub async fn run_campaign(&self, id: &Uuid) -> ConformanceResult<TestRun> {
        let campaign = self.stores.results.get(id).await?;
        if campaign.seeds.is_empty() {
            return Err(ConformanceError::Invalid(format!("campaign {id} has no seed devices")));
        }
        let mut seeds = Vec::with_capacity(campaign.seeds.len());
        for guid in &campaign.seeds {
            seeds.push(self.stores.vouchers.get(guid).await?.to_generated()?);
        }
        let owner_addrs = self
            .config
            .owner_urls
            .iter()
            .map(|url| RvTo2Addr::from_url(url))
            .collect::<Result<Vec<_>, _>>()?;

        let mut run = TestRun::new();
        match self.stores.results.start_new_run(id).await {
            Ok(run_id) => run.id = run_id,
            Err(err) => warn!(run = %run.id, error = %err, "run not persisted; results kept in memory"),
        }

        let mut preflight = None;
        if campaign.protocol == Protocol::To1 {
            // TO1 needs every seed to be known to the rendezvous server.
            for seed in &seeds {
                let mut to0 = To0Requestor::new(
                    self.client(&campaign.target)?,
                    seed.clone(),
                    owner_addrs.clone(),
                    self.config.wait_seconds,
                );
                if let Err(err) = to0.register().await {
                    warn!(guid = %seed.credential.guid, error = %err, "seed registration failed; every TO1 identity fails");
                    preflight = Some(format!("seed registration failed: {err}"));
                    break;
                }
            }
        }

        for (i, test) in campaign_tests(campaign.protocol).into_iter().enumerate() {
            let seed = &seeds[i % seeds.len()];
            let outcome = match &preflight {
                Some(why) => TestOutcome::fail(why.clone()),
                None => self
                    .run_test(&campaign, seed, &owner_addrs, test)
                    .await
                    .unwrap_or_else(|err| TestOutcome::fail(err.to_string())),
            };
            if outcome.passed {
                info!(test_id = %test, guid = %seed.credential.guid, "passed");
            } else {
                warn!(test_id = %test, guid = %seed.credential.guid, error = outcome.error.as_deref().unwrap_or(""), "failed");
            }
            if let Err(err) = self.report_test(id, test, outcome.clone()).await {
                warn!(test_id = %test, error = %err, "outcome not persisted");
            }
            run.report(test, outcome);
        }

        if let Err(err) = self.finish_run(id).await {
            warn!(error = %err, "run not marked finished");
        }
        info!(
            run = %run.id,
            total = run.results.len(),
            failed = run.failures().len(),
            "campaign run complete"
        );
        Ok(run)
    }

    async fn run_test(
        &self,
        campaign: &Campaign,
        seed: &GeneratedVoucher,
        owner_addrs: &[RvTo2Addr],
        test: TestId,
    ) -> ConformanceResult<TestOutcome> {
        let client = self.client(&campaign.target)?;
        match campaign.protocol {
            Protocol::To0 => {
                To0Requestor::new(client, seed.clone(), owner_addrs.to_vec(), self.config.wait_seconds)
                    .run(Some(test))
                    .await
            }
            Protocol::To1 => {
                To1Requestor::new(client, seed.credential.clone())
                    .run(Some(test))
                    .await
            }
            Protocol::To2 if test.voucher_fault().is_some() => {
                let guid = campaign
                    .test_vouchers
                    .get(&test)
                    .ok_or_else(|| ConformanceError::not_found(format!("faulted voucher for {test}")))?;
                let faulted = self.stores.vouchers.get(guid).await?.to_generated()?;
                To2Requestor::new(client, faulted.credential, self.to2_config())
                    .run(Some(test))
                    .await
            }
            Protocol::To2 => {
                To2Requestor::new(client, seed.credential.clone(), self.to2_config())
                    .run(Some(test))
                    .await
            }
        }
    }

    fn client(&self, target: &str) -> ConformanceResult<FdoClient> {
        Ok(FdoClient::new(target, &self.config.client)?)
    }

    fn to2_config(&self) -> To2Config {
        To2Config {
            kex_suite: self.config.kex_suite,
            cipher_suite: self.config.cipher_suite,
            max_service_info_rounds: self.config.max_service_info_rounds,
            ..To2Config::default()
        }
    }
}
