//! Binary entrypoint for photo-courier.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use photo_courier::client::CommandUploader;
use photo_courier::config::Configuration;
use photo_courier::events::FrameRequest;
use photo_courier::failures::FailedStore;
use photo_courier::feed::SharedFeed;
use photo_courier::ledger::Ledger;
use photo_courier::supervisor::Supervisor;
use photo_courier::{logging, web};

/// Simple CLI
#[derive(Debug, Parser)]
#[command(
    name = "photo-courier",
    about = "SD-card photo uploader with a live slideshow"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Override per-image dwell (ms)
    #[arg(long, value_name = "MILLIS")]
    dwell_ms: Option<u64>,

    /// Start with the uploader idle; the control API can start it later
    #[arg(long)]
    no_uploader: bool,

    /// Start with the slideshow idle
    #[arg(long)]
    no_slideshow: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("validating configuration")?;
    if let Some(ms) = cli.dwell_ms {
        cfg.slideshow.dwell = Duration::from_millis(ms);
    }

    std::fs::create_dir_all(&cfg.state_dir)
        .with_context(|| format!("creating state dir {}", cfg.state_dir.display()))?;
    // An unreadable ledger is fatal; it is never silently reset.
    let ledger = Arc::new(Ledger::open(cfg.ledger_path()).context("opening upload ledger")?);
    info!(entries = ledger.len(), "ledger loaded");
    let failures = Arc::new(FailedStore::load(cfg.failures_path()));
    let feed = SharedFeed::new(cfg.slideshow.display_mode());
    let client = Arc::new(CommandUploader::new(
        cfg.uploader.command.program.clone(),
        cfg.uploader.command.args.clone(),
        cfg.uploader.command.terminal_exit_code,
    ));

    let (frame_tx, mut frame_rx) = mpsc::channel::<FrameRequest>(4);
    // Stand-in for the external renderer: surface chosen frames in the log.
    tokio::spawn(async move {
        while let Some(FrameRequest(path)) = frame_rx.recv().await {
            info!(target: "photo_courier::render", path = %path.display(), "frame");
        }
    });

    let supervisor = Arc::new(Supervisor::new(
        cfg.clone(),
        ledger,
        failures,
        feed,
        client,
        frame_tx,
    ));
    if !cli.no_uploader {
        supervisor.start_uploader();
    }
    if !cli.no_slideshow {
        supervisor.start_slideshow();
    }

    let cancel = CancellationToken::new();
    let web_handle = if cfg.control.enabled {
        Some(web::spawn(
            supervisor.clone(),
            logging::buffer(),
            cancel.clone(),
            cfg.control.bind_addr,
        ))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    supervisor.shutdown().await;
    cancel.cancel();
    if let Some(handle) = web_handle {
        let _ = handle.await;
    }
    Ok(())
}
