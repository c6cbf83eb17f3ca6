//! otad - firmware registry daemon
//!
//! Stores firmware images, tracks the current version and answers the
//! conditional fetches devices use to update themselves.

use anyhow::Result;
use clap::Parser;
use otad::config::{RegistryConfig, CONFIG_ENV, CONFIG_PATH};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "otad")]
#[command(about = "Firmware registry for latch devices", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address (e.g. 0.0.0.0:8080)
    #[arg(long)]
    listen: Option<String>,

    /// Override the firmware directory
    #[arg(long)]
    firmware_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = latch_common::config::resolve_path(cli.config, CONFIG_ENV, CONFIG_PATH);
    let mut config = RegistryConfig::load(&config_path)?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(dir) = cli.firmware_dir {
        config.firmware_dir = dir;
    }

    let level = if config.debug { "debug" } else { config.log_level.as_str() };
    latch_common::logging::init(level);

    info!("otad v{} starting", env!("CARGO_PKG_VERSION"));
    otad::server::run(config).await
}
