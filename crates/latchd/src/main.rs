//! latchd - door latch device daemon
//!
//! Listens for `unlock` / `lock` datagrams, pulses the actuator, and checks
//! the firmware registry for updates.

use anyhow::Result;
use clap::Parser;
use latchd::config::{DeviceConfig, CONFIG_ENV, CONFIG_PATH};
use latchd::daemon::{self, ExitReason};
use latchd::RUNNING_VERSION;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "latchd")]
#[command(about = "Door latch device daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the registry base URL
    #[arg(long)]
    registry: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = latch_common::config::resolve_path(cli.config, CONFIG_ENV, CONFIG_PATH);
    let mut config = DeviceConfig::load(&config_path)?;
    if let Some(registry) = cli.registry {
        config.update.registry_url = registry;
    }

    latch_common::logging::init(&config.log_level);
    info!(
        "latchd v{} starting (firmware {})",
        env!("CARGO_PKG_VERSION"),
        RUNNING_VERSION
    );

    match daemon::run(&config, RUNNING_VERSION).await? {
        ExitReason::Shutdown => info!("Stopped"),
        ExitReason::Restart => info!("Restarting into staged firmware"),
    }
    Ok(())
}
