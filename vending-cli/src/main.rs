use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vending_core::cardreader::{CardReader, StdinCardReader};
use vending_core::config::Config;
use vending_core::mdb::MdbEngine;
use vending_core::orchestrator::Orchestrator;
use vending_core::provider::https::HmacHttpsProvider;
use vending_core::provider::local::LocalSqliteProvider;
use vending_core::provider::nonce_store::NonceStore;
use vending_core::provider::{Provider, ProviderChain};
use vending_core::report::ReportWorker;
use vending_core::serial;

/// MDB cashless-peripheral controller for the student-association vending machine.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "vending.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(port = %config.serial.port, "opening MDB serial link");
    let port = serial::open(&config.serial.port, config.serial.baud_rate)
        .context("opening serial port")?;

    let mut providers: Vec<Box<dyn Provider>> = Vec::new();
    if let Some(https) = &config.provider.https {
        let nonces = Arc::new(
            NonceStore::open(std::path::Path::new(&https.nonce_db_path))
                .context("opening nonce store")?,
        );
        tokio::spawn(prune_nonces_daily(nonces.clone()));
        providers.push(Box::new(HmacHttpsProvider::new(
            https.base_url.clone(),
            https.shared_secret.clone().into_bytes(),
            nonces,
        )));
    }
    if let Some(local) = &config.provider.local {
        providers.push(Box::new(
            LocalSqliteProvider::open(std::path::Path::new(&local.db_path), local.flat_credits)
                .context("opening local fallback provider")?,
        ));
    }
    let providers = Arc::new(ProviderChain::new(providers));

    let open_session = Arc::new(AtomicBool::new(false));
    let (engine_tx, engine_rx) = tokio::sync::mpsc::channel(16);
    let (display_tx, display_rx) = tokio::sync::mpsc::channel(16);
    let (card_tx, card_rx) = tokio::sync::mpsc::channel(16);
    let (reports_tx, reports_rx) = tokio::sync::mpsc::channel(16);
    let (completed_tx, completed_rx) = tokio::sync::mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let shutdown_check = shutdown_rx.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, telling the MDB engine to wind down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut engine = MdbEngine::new(port, open_session.clone(), engine_tx, display_rx, shutdown_rx);
    let engine_task = tokio::spawn(async move { engine.run().await });

    let report_worker = ReportWorker::new(providers.clone(), reports_rx, completed_tx);
    let report_task = tokio::spawn(async move {
        report_worker.run().await;
        Ok::<(), vending_core::VendError>(())
    });

    let orchestrator = Orchestrator::new(providers, open_session, display_tx, reports_tx);
    let orchestrator_task = tokio::spawn(orchestrator.run(engine_rx, card_rx, completed_rx));

    let mut reader = StdinCardReader::new();
    let reader_task = tokio::spawn(async move {
        loop {
            match reader.next_event().await {
                Ok(event) => {
                    if card_tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "card reader failed");
                    return Err(e);
                }
            }
        }
    });

    tokio::select! {
        res = engine_task => check_worker_exit("engine", res, *shutdown_check.borrow())?,
        res = orchestrator_task => check_worker_exit("orchestrator", res, *shutdown_check.borrow())?,
        res = report_task => check_worker_exit("report", res, *shutdown_check.borrow())?,
        res = reader_task => check_worker_exit("reader", res, *shutdown_check.borrow())?,
    }

    Ok(())
}

/// Every core worker is expected to run for the life of the process; one
/// finishing on its own is only a clean exit if a shutdown was requested.
/// Otherwise, per the documented exit-code contract, it is treated as a
/// fatal error so the process exits non-zero.
fn check_worker_exit(
    name: &str,
    res: std::result::Result<vending_core::Result<()>, tokio::task::JoinError>,
    shutting_down: bool,
) -> Result<()> {
    match res {
        Err(join_err) => anyhow::bail!("{name} worker panicked: {join_err}"),
        Ok(Err(e)) => anyhow::bail!("{name} worker failed: {e}"),
        Ok(Ok(())) if !shutting_down => anyhow::bail!("{name} worker terminated unexpectedly"),
        Ok(Ok(())) => Ok(()),
    }
}

/// Drops nonce-ledger entries older than 48 hours once a day, keeping the
/// SQLite table from growing without bound.
async fn prune_nonces_daily(nonces: Arc<NonceStore>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
    loop {
        ticker.tick().await;
        let cutoff = chrono::Utc::now().timestamp() - 48 * 60 * 60;
        match nonces.prune_older_than(cutoff).await {
            Ok(removed) => tracing::debug!(removed, "pruned stale nonce ledger entries"),
            Err(e) => tracing::warn!(error = %e, "failed to prune nonce ledger"),
        }
    }
}
