//! `fdo-conformance gen-voucher` and voucher record files.

use crate::config::FileConfig;
use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use fdo_conformance::TestId;
use fdo_conformance::store::VoucherRecord;
use fdo_protocol::types::RendezvousInfo;
use fdo_protocol::voucher::{GeneratedVoucher, VoucherBuilder, VoucherFault};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::info;

/// Arguments for the `gen-voucher` command.
#[derive(Args, Debug)]
pub struct GenVoucherArgs {
    /// Write the CBOR record here instead of printing hex.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Voucher test identity to inject, e.g. FIDO_VOUCHER_ENTRY_BAD_SIGNATURE.
    #[arg(long)]
    pub fault: Option<String>,

    /// Owner entries in the chain (random within the configured range if unset).
    #[arg(long)]
    pub entries: Option<usize>,
}

/// Run the gen-voucher command.
///
/// # Errors
/// Unknown fault codes, generation failures and unwritable output.
pub fn run(args: &GenVoucherArgs, config: &FileConfig) -> Result<()> {
    let fault = args.fault.as_deref().map(parse_fault).transpose()?;
    let generated = generate(config, args.entries, fault)?;
    let record = VoucherRecord::from_generated(&generated)?;
    let bytes = fdo_cbor::to_vec(&record).context("failed to encode voucher record")?;

    match &args.out {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(guid = %record.guid, path = %path.display(), "voucher written");
        }
        None => println!("{}", hex::encode(&bytes)),
    }
    Ok(())
}

/// A fresh credential and voucher using the configured rendezvous URLs.
///
/// # Errors
/// Bad rendezvous URLs and generation failures.
pub fn generate(
    config: &FileConfig,
    entries: Option<usize>,
    fault: Option<VoucherFault>,
) -> Result<GeneratedVoucher> {
    let rv_info = RendezvousInfo::from_urls(&config.voucher.rv_urls)
        .context("invalid rendezvous URL in [voucher] rv_urls")?;
    let entries = entries.unwrap_or_else(|| rand::thread_rng().gen_range(config.entry_range()));
    Ok(VoucherBuilder::new(rv_info)
        .entry_count(entries)
        .fault(fault)
        .build()?)
}

/// Read a record written by `gen-voucher --out`.
///
/// # Errors
/// Unreadable files and records that no longer decode.
pub fn read_record(path: &Path) -> Result<GeneratedVoucher> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let record: VoucherRecord = fdo_cbor::from_slice(&bytes)
        .with_context(|| format!("{} is not a voucher record", path.display()))?;
    Ok(record.to_generated()?)
}

fn parse_fault(code: &str) -> Result<VoucherFault> {
    let id: TestId = code.parse().map_err(|e: String| anyhow!(e))?;
    match id.voucher_fault() {
        Some(fault) => Ok(fault),
        None => bail!("{code} is not a voucher test identity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voucher_codes_map_to_faults() {
        assert_eq!(
            parse_fault("FIDO_VOUCHER_ENTRY_BAD_SIGNATURE").unwrap(),
            VoucherFault::EntryBadSignature
        );
        assert!(parse_fault("FIDO_DOT_60_POSITIVE").is_err());
        assert!(parse_fault("NOT_A_TEST").is_err());
    }

    #[test]
    fn record_file_round_trips_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.cbor");
        let args = GenVoucherArgs {
            out: Some(path.clone()),
            fault: None,
            entries: Some(2),
        };
        run(&args, &FileConfig::default()).unwrap();

        let generated = read_record(&path).unwrap();
        assert_eq!(generated.voucher.entries.len(), 2);
        assert_eq!(generated.voucher.header().unwrap().guid, generated.credential.guid);
    }

    #[test]
    fn entry_count_defaults_to_the_configured_range() {
        let g = generate(&FileConfig::default(), None, None).unwrap();
        assert!(FileConfig::default().entry_range().contains(&g.voucher.entries.len()));
    }
}
