//! `fdo-conformance run`: execute a requestor campaign against a target.

use crate::config::FileConfig;
use crate::voucher;
use anyhow::{Result, bail};
use clap::Args;
use fdo_conformance::{Orchestrator, OrchestratorConfig, Stores, TestRun};
use fdo_protocol::Protocol;
use fdo_store::{MemoryKvStore, MemoryStoreConfig};
use std::sync::Arc;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Base URL of the implementation under test.
    #[arg(long, env = "FDO_TARGET")]
    pub target: String,

    /// Protocol to exercise: to0, to1 or to2.
    #[arg(long, env = "FDO_PROTOCOL")]
    pub protocol: Protocol,

    /// Seed devices to generate for the campaign.
    #[arg(long, default_value_t = 1)]
    pub vouchers: usize,

    /// Owner address announced in TO0 registrations (repeatable).
    #[arg(long = "owner-url", env = "FDO_OWNER_URLS", value_delimiter = ',')]
    pub owner_urls: Vec<String>,
}

/// Run the campaign and print one line per test identity.
///
/// # Errors
/// Setup failures, and any failed identity.
pub async fn run(args: &RunArgs, config: &FileConfig) -> Result<()> {
    if args.vouchers == 0 {
        bail!("--vouchers must be at least 1");
    }
    let seeds = (0..args.vouchers)
        .map(|_| voucher::generate(config, None, None))
        .collect::<Result<Vec<_>>>()?;

    let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
    let mut orchestrator_config = OrchestratorConfig {
        client: config.client_config(),
        ..OrchestratorConfig::default()
    };
    if !args.owner_urls.is_empty() {
        orchestrator_config.owner_urls.clone_from(&args.owner_urls);
    }
    let orchestrator = Orchestrator::new(Stores::over(kv), orchestrator_config);

    let campaign = orchestrator
        .register(args.target.as_str(), args.protocol, &seeds)
        .await?;
    let run = orchestrator.run_campaign(&campaign.id).await?;
    print_results(&run);

    let failed = run.failures().len();
    if failed > 0 {
        bail!("{failed} of {} tests failed", run.results.len());
    }
    Ok(())
}

fn print_results(run: &TestRun) {
    println!("Run {} ({})", run.id, run.started_at.to_rfc3339());
    for (id, outcome) in &run.results {
        match &outcome.error {
            _ if outcome.passed => println!("  PASS  {id}"),
            Some(error) => println!("  FAIL  {id}: {error}"),
            None => println!("  FAIL  {id}"),
        }
    }
}
