//! Configuration for otad.
//!
//! Loads settings from /etc/latch/otad.toml (or `--config` / `OTAD_CONFIG`)
//! or uses defaults. `DEBUG=true` in the environment forces debug request
//! logging regardless of the file.

use anyhow::Result;
use latch_common::{MAX_UPLOAD_BYTES, DEFAULT_REGISTRY_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/latch/otad.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "OTAD_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Flat directory holding one `firmware_<version>.bin` per image
    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: PathBuf,

    /// Upload size ceiling in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Current version at startup; empty means no current image
    #[serde(default = "default_initial_version")]
    pub initial_version: String,

    /// Log every request, including health probes
    #[serde(default)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> String {
    format!("0.0.0.0:{}", DEFAULT_REGISTRY_PORT)
}

fn default_firmware_dir() -> PathBuf {
    PathBuf::from("./firmware")
}

fn default_max_upload_bytes() -> u64 {
    MAX_UPLOAD_BYTES
}

fn default_initial_version() -> String {
    "1.1.0".to_string() // factory image shipped on devices
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            firmware_dir: default_firmware_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            initial_version: default_initial_version(),
            debug: false,
            log_level: default_log_level(),
        }
    }
}

impl RegistryConfig {
    /// Load from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = latch_common::config::load_or_default(path)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if std::env::var("DEBUG").map(|v| v == "true").unwrap_or(false) {
            self.debug = true;
        }
    }

    /// Initial current version, `None` when unset.
    pub fn initial_current(&self) -> Option<String> {
        let v = self.initial_version.trim();
        if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        }
    }
}
