//! ipfs-podcast-node: turns a local IPFS node into a worker for IPFSPodcasting.net
//!
//! Each run asks the coordinator for work, then:
//! - downloads episodes straight into IPFS and pins them
//! - pins hashes that already exist on the network
//! - unpins expired episodes
//! and reports the outcome with the node's storage usage.
//!
//! Meant to be invoked periodically (cron/systemd timer), or with
//! `--turbo-mode` to keep working until the coordinator runs dry.

mod config;
mod coordinator;
mod dispatch;
mod download;
mod gateway;
mod payload;
mod runner;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info};

use config::{Config, ConfigSource};
use coordinator::CoordinatorClient;
use dispatch::Dispatcher;
use download::DownloadPipeline;
use gateway::IpfsCli;
use runner::Runner;

/// Exit code when the ipfs executable cannot be found
const EXIT_IPFS_NOT_FOUND: i32 = 100;

#[derive(Parser)]
#[command(name = "ipfs-podcast-node")]
#[command(about = "IPFS Podcast Node")]
struct Cli {
    /// Your email for support & management via IPFSPodcasting.net/Manage
    email: String,

    /// Runs until a failure occurs or there's no more work
    #[arg(long)]
    turbo_mode: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "ipfs-podcast-node.toml")]
    config: PathBuf,

    /// Coordinator base URL (overrides config file)
    #[arg(long, env = "IPFS_PODCAST_COORDINATOR")]
    coordinator_url: Option<String>,

    /// Path to the ipfs executable (overrides config file)
    #[arg(long, env = "IPFS_PODCAST_IPFS_BIN")]
    ipfs_binary: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = Config::load(&cli.config)?;

    // Apply CLI overrides
    if cli.turbo_mode {
        config.node.turbo_mode = true;
    }
    if let Some(url) = cli.coordinator_url {
        config.coordinator.base_url = url;
    }
    if let Some(binary) = cli.ipfs_binary {
        config.ipfs.binary = Some(binary);
    }
    if let Some(log_file) = cli.log_file {
        config.logging.file = Some(log_file);
    }
    config.validate()?;

    init_tracing(&config)?;

    info!("Starting ipfs-podcast-node");
    match &source {
        ConfigSource::File(path) => info!("Config file: {}", path.display()),
        ConfigSource::Defaults => info!("Config file not found, using defaults"),
    }

    let located = IpfsCli::locate(config.ipfs.binary.as_deref(), &config.ipfs.search_path);
    let Some(binary) = located else {
        error!(search_path = %config.ipfs.search_path, "ipfs executable not found");
        std::process::exit(EXIT_IPFS_NOT_FOUND);
    };

    let ipfs = IpfsCli::new(
        binary,
        config.ipfs.command_timeout(),
        config.transfer.timeout(),
    );
    info!("ipfs: {}", ipfs.binary().display());
    info!("Coordinator: {}", config.coordinator.base_url);

    let coordinator = CoordinatorClient::new(
        config.coordinator.base_url.clone(),
        config.coordinator.timeout(),
    );
    let dispatcher = Dispatcher::new(DownloadPipeline::new(&config.transfer)?);

    let mut runner = Runner::new(
        cli.email,
        config.node.turbo_mode,
        config.ipfs.resolved_data_path(),
        Arc::new(ipfs),
        Arc::new(coordinator),
        dispatcher,
    );

    let summary = runner.start(&config.startup).await;
    info!(cycles = summary.cycles, stop = ?summary.stop, "Done");

    Ok(())
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("ipfs_podcast_node=info".parse()?);

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}
