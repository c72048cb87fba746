//! `fdo-conformance serve`: run the listener on a TCP socket.

use crate::config::FileConfig;
use crate::voucher;
use anyhow::{Context, Result};
use clap::Args;
use fdo_conformance::{Listener, ListenerConfig, Stores};
use fdo_store::{MemoryKvStore, MemoryStoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (defaults to `[listener] host`).
    #[arg(long, env = "FDO_LISTENER_HOST")]
    pub host: Option<String>,

    /// Port to bind (defaults to `[listener] port`).
    #[arg(long, env = "FDO_LISTENER_PORT")]
    pub port: Option<u16>,

    /// Voucher record written by `gen-voucher --out` (repeatable).
    #[arg(long)]
    pub register: Vec<PathBuf>,
}

/// Serve until interrupted.
///
/// # Errors
/// Unreadable device records and socket failures.
pub async fn run(args: &ServeArgs, config: &FileConfig) -> Result<()> {
    let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
    let listener = Listener::new(Stores::over(kv), ListenerConfig::default());
    for path in &args.register {
        let generated = voucher::read_record(path)?;
        let instance = listener.register_device(&generated).await?;
        info!(guid = %instance.guid, listener = %instance.id, path = %path.display(), "device registered");
    }

    let host = args.host.as_deref().unwrap_or(&config.listener.host);
    let port = args.port.unwrap_or(config.listener.port);
    let tcp = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;

    tokio::select! {
        served = fdo_conformance::listener::serve(tcp, listener) => served.context("listener failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
