// src/main.rs

use anyhow::{Context, Result};
use bagforge::{BagforgeConfig, DepositProcessor, IngestArea, Outbox};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "bagforge")]
#[command(author, version, about = "Repackage archival deposits into checksummed bags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch every configured inbox and process new deposits until interrupted
    Watch {
        /// Configuration file
        #[arg(short, long, default_value = "/etc/opt/bagforge/config.toml")]
        config: PathBuf,
    },
    /// Process one deposit, or a batch directory of deposits, and exit
    Ingest {
        /// Deposit (or batch) directory inside a configured inbox
        path: PathBuf,
        /// Configuration file
        #[arg(short, long, default_value = "/etc/opt/bagforge/config.toml")]
        config: PathBuf,
        /// Treat PATH as a batch: process every deposit in it
        #[arg(long)]
        batch: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { config } => cmd_watch(&config),
        Commands::Ingest {
            path,
            config,
            batch,
        } => cmd_ingest(&config, &path, batch),
    }
}

fn start_ingest_area(config: &BagforgeConfig) -> Result<IngestArea> {
    std::fs::create_dir_all(&config.output.directory).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output.directory.display()
        )
    })?;
    let processor = Arc::new(DepositProcessor::from_config(config)?);
    let area = IngestArea::new(
        config.ingest.inboxes.clone(),
        config.poll_interval()?,
        config.ingest.workers,
        processor,
    )?;
    Ok(area)
}

fn cmd_watch(config_path: &Path) -> Result<()> {
    let config = BagforgeConfig::load(config_path)?;
    if config.ingest.inboxes.is_empty() {
        anyhow::bail!("ingest.inboxes is empty, nothing to watch");
    }

    let mut outbox = Outbox::new(&config.outbox.root);
    outbox
        .init(config.outbox.allow_non_empty)
        .with_context(|| format!("Failed to initialize outbox {}", config.outbox.root.display()))?;

    let area = start_ingest_area(&config)?;
    let mut watchers = Vec::with_capacity(config.ingest.inboxes.len());
    for inbox in &config.ingest.inboxes {
        let watcher = area.start_watch(inbox, outbox.clone())?;
        info!("Watching {}", watcher.inbox().display());
        watchers.push(watcher);
    }
    info!("Watching {} inbox(es); interrupt to stop", watchers.len());

    loop {
        std::thread::park();
    }
}

fn cmd_ingest(config_path: &Path, path: &Path, batch: bool) -> Result<()> {
    let config = BagforgeConfig::load(config_path)?;

    let mut outbox = Outbox::new(&config.outbox.root);
    // One-shot runs share the outbox with earlier runs
    outbox
        .init(true)
        .with_context(|| format!("Failed to initialize outbox {}", config.outbox.root.display()))?;

    let area = start_ingest_area(&config)?;
    let queued = area.ingest(path, &outbox, batch)?;
    info!("Queued {} deposit(s), waiting for workers", queued);
    area.shutdown();
    Ok(())
}
