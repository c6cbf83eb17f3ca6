//! latchctl - administer the firmware registry and talk to latch devices

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use latch_common::{DEFAULT_COMMAND_PORT, DEFAULT_REGISTRY_PORT, DEFAULT_STATUS_PORT};
use latchctl::client::{DeviceClient, Fetched, RegistryAdmin};
use latchctl::output;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "latchctl")]
#[command(about = "Latch device and firmware registry control", long_about = None)]
#[command(version)]
struct Cli {
    /// Registry base URL
    #[arg(long, global = true, default_value_t = format!("http://127.0.0.1:{}", DEFAULT_REGISTRY_PORT))]
    registry: String,

    /// Device host name or address
    #[arg(long, global = true, default_value = "127.0.0.1")]
    device: String,

    /// Device UDP command port
    #[arg(long, global = true, default_value_t = DEFAULT_COMMAND_PORT)]
    command_port: u16,

    /// Device status interface port
    #[arg(long, global = true, default_value_t = DEFAULT_STATUS_PORT)]
    status_port: u16,

    /// Print JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pulse the latch open
    Unlock,

    /// Relock immediately
    Lock,

    /// Show device status
    Status,

    /// Ask the device to check for an update now
    Update,

    /// Upload a firmware image and make it current
    Upload {
        /// Version label for the image
        version: String,
        /// Image file
        file: PathBuf,
    },

    /// List stored firmware images
    List,

    /// Delete a stored image
    Delete {
        version: String,
    },

    /// Show the current firmware version
    Current,

    /// Download an image the way a device would
    Fetch {
        /// Specific version instead of the current one
        #[arg(long)]
        version: Option<String>,
        /// Report this running version (may yield "not modified")
        #[arg(long)]
        client_version: Option<String>,
        /// Write the image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        registry: registry_url,
        device,
        command_port,
        status_port,
        json,
        command,
    } = Cli::parse();
    let device_client = || DeviceClient::for_host(&device, command_port, status_port);

    match command {
        Commands::Unlock => send(&device_client()?, "unlock", &device, command_port).await?,
        Commands::Lock => send(&device_client()?, "lock", &device, command_port).await?,
        Commands::Status => {
            let status = device_client()?.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", output::render_status(&status));
            }
        }
        Commands::Update => {
            let response = device_client()?.trigger_update().await?;
            println!("{}", response.message);
        }
        Commands::Upload { version, file } => {
            let image = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "firmware.bin".to_string());
            let registry = RegistryAdmin::new(&registry_url)?;
            let message = registry.upload(&version, image, &filename).await?;
            println!("{} {}", "[OK]".bright_green(), message.trim());
        }
        Commands::List => {
            let registry = RegistryAdmin::new(&registry_url)?;
            let images = registry.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&images)?);
            } else {
                print!("{}", output::render_firmware_list(&images));
            }
        }
        Commands::Delete { version } => {
            let registry = RegistryAdmin::new(&registry_url)?;
            let message = registry.delete(&version).await?;
            println!("{} {}", "[OK]".bright_green(), message.trim());
        }
        Commands::Current => {
            let registry = RegistryAdmin::new(&registry_url)?;
            match registry.current().await? {
                Some(version) => println!("{}", version),
                None => println!("{}", "No current version".dimmed()),
            }
        }
        Commands::Fetch {
            version,
            client_version,
            output: out_path,
        } => {
            let registry = RegistryAdmin::new(&registry_url)?;
            match registry
                .fetch(version.as_deref(), client_version.as_deref())
                .await?
            {
                Fetched::NotModified => println!("Not modified"),
                Fetched::Image { bytes, sha256 } => {
                    if let Some(path) = out_path {
                        tokio::fs::write(&path, &bytes)
                            .await
                            .with_context(|| format!("Cannot write {}", path.display()))?;
                        println!("Wrote {} to {}", output::human_size(bytes.len() as u64), path.display());
                    } else {
                        println!("Fetched {} ({} bytes)", output::human_size(bytes.len() as u64), bytes.len());
                    }
                    println!("sha256 {}", sha256);
                }
            }
        }
    }

    Ok(())
}

async fn send(device: &DeviceClient, token: &str, host: &str, port: u16) -> Result<()> {
    device.send_command(token).await?;
    println!("Sent '{}' to {}:{}", token, host, port);
    Ok(())
}
