//! FDO conformance operator CLI.
//!
//! - `fdo-conformance run` - Run a requestor campaign against a target
//! - `fdo-conformance serve` - Serve the rendezvous and owner listener
//! - `fdo-conformance gen-voucher` - Generate a device credential and voucher

#![forbid(unsafe_code)]

mod config;
mod run;
mod serve;
mod voucher;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// FDO conformance operator CLI.
#[derive(Parser)]
#[command(name = "fdo-conformance")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "FDO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every test identity of a protocol against a target.
    ///
    /// Prints one line per identity and exits non-zero when any failed.
    ///
    /// Example: fdo-conformance run --target http://127.0.0.1:8040 --protocol to0
    Run(run::RunArgs),

    /// Serve the conformance listener.
    ///
    /// Devices registered with `--register` get a listener instance that
    /// records their TO2 results.
    Serve(serve::ServeArgs),

    /// Generate a device credential and ownership voucher.
    ///
    /// Writes the record as CBOR, or hex on stdout without `--out`.
    GenVoucher(voucher::GenVoucherArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries results; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run::run(&args, &config).await,
        Commands::Serve(args) => serve::run(&args, &config).await,
        Commands::GenVoucher(args) => voucher::run(&args, &config),
    }
}
