//! Wire types exchanged between registry, device and CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `GET /version` response. `version` is empty when no current image is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// One entry of `GET /list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub version: String,
    pub filename: String,
    pub size: u64,
    /// RFC 3339 modification time of the stored image
    pub modified: String,
    pub sha256: String,
    pub is_current: bool,
    pub download_url: String,
}

/// Physical lock state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    #[default]
    Locked,
    Unlocked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => write!(f, "locked"),
            LockState::Unlocked => write!(f, "unlocked"),
        }
    }
}

/// Link state toward the registry, as last observed by the update agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Unknown => write!(f, "unknown"),
            Connectivity::Connected => write!(f, "connected"),
            Connectivity::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Update agent phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    #[default]
    Idle,
    CheckingConnectivity,
    Negotiating,
    Installing,
    UpToDate,
    Failed,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPhase::Idle => "idle",
            AgentPhase::CheckingConnectivity => "checking_connectivity",
            AgentPhase::Negotiating => "negotiating",
            AgentPhase::Installing => "installing",
            AgentPhase::UpToDate => "up_to_date",
            AgentPhase::Failed => "failed",
        }
    }

    /// Whether an attempt is currently running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AgentPhase::CheckingConnectivity | AgentPhase::Negotiating | AgentPhase::Installing
        )
    }
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /status` response from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub running_version: String,
    pub lock_state: LockState,
    pub unlock_count: u64,
    pub uptime_secs: u64,
    pub connectivity: Connectivity,
    /// `None` until the first update check has run
    pub registry_reachable: Option<bool>,
    pub last_update_check: Option<DateTime<Utc>>,
    pub agent_phase: AgentPhase,
    /// How the last finished attempt ended (`up_to_date`, `failed`, `installing`)
    #[serde(default)]
    pub last_update_result: Option<AgentPhase>,
    pub last_update_error: Option<String>,
}

/// `POST /update` response from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTriggerResponse {
    pub accepted: bool,
    pub message: String,
}
