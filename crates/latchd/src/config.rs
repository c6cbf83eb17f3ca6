//! Configuration for latchd.
//!
//! Loads settings from /etc/latch/latchd.toml (or `--config` /
//! `LATCHD_CONFIG`) or uses defaults.

use anyhow::Result;
use latch_common::{DEFAULT_COMMAND_PORT, DEFAULT_REGISTRY_PORT, DEFAULT_STATUS_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/latch/latchd.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "LATCHD_CONFIG";

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// UDP address for `unlock` / `lock` datagrams
    #[serde(default = "default_command_addr")]
    pub command_addr: String,

    /// HTTP address for the status interface
    #[serde(default = "default_status_addr")]
    pub status_addr: String,

    /// How long the actuator stays energized after `unlock`
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,

    /// Sysfs-style GPIO value file driving the actuator; unset logs only
    #[serde(default)]
    pub actuator_gpio: Option<PathBuf>,

    #[serde(default)]
    pub update: UpdateConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_command_addr() -> String {
    format!("0.0.0.0:{}", DEFAULT_COMMAND_PORT)
}

fn default_status_addr() -> String {
    format!("0.0.0.0:{}", DEFAULT_STATUS_PORT)
}

fn default_pulse_ms() -> u64 {
    3_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            command_addr: default_command_addr(),
            status_addr: default_status_addr(),
            pulse_ms: default_pulse_ms(),
            actuator_gpio: None,
            update: UpdateConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl DeviceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        latch_common::config::load_or_default(path)
    }

    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }
}

/// Auto-update mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Check on a timer and on request
    #[default]
    Auto,
    /// Check only when triggered through the status interface
    Manual,
}

/// Update agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default)]
    pub mode: UpdateMode,

    /// Registry base URL
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Delay before the first check after boot
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Check interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound of the random delay added to each scheduled check
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Budget for one whole attempt, connectivity check through staging
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Where downloaded images are staged for the supervisor to flash
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_registry_url() -> String {
    format!("http://127.0.0.1:{}", DEFAULT_REGISTRY_PORT)
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_interval_secs() -> u64 {
    600 // 10 minutes
}

fn default_jitter_secs() -> u64 {
    60
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/var/lib/latch/staging")
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            mode: UpdateMode::Auto,
            registry_url: default_registry_url(),
            initial_delay_secs: default_initial_delay_secs(),
            interval_secs: default_interval_secs(),
            jitter_secs: default_jitter_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl UpdateConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
