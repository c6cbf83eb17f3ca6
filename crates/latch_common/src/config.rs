//! TOML configuration loading.
//!
//! Every daemon keeps its own config struct with per-field serde defaults;
//! this module only handles locating and parsing the file.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load `path` as TOML, or return `T::default()` when the file is absent.
///
/// A file that exists but fails to parse is an error.
pub fn load_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Pick the config path: explicit flag, then `env_var`, then `default_path`.
pub fn resolve_path(explicit: Option<PathBuf>, env_var: &str, default_path: &str) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(env_var).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default_path))
}
