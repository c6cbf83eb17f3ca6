//! Update agent.
//!
//! One attempt runs `CheckingConnectivity -> Negotiating -> Installing`, ending
//! up to date, installed or failed. The attempt is an owned future so the
//! device loop can poll it next to command handling. The running attempt
//! writes its phase into a shared `watch` cell; status snapshots and the
//! timeout path read it back through the sender.

use crate::client::{DownloadedImage, Negotiation, RegistryClient};
use chrono::{DateTime, Utc};
use latch_common::{sha256_hex, verify_sha256, AgentPhase, Connectivity, LatchError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Staged image file name inside the staging directory
pub const STAGED_IMAGE: &str = "staged.bin";

/// Marker telling the supervisor a staged image is ready to flash
pub const RESTART_MARKER: &str = "restart_requested";

/// In-flight update attempt.
pub type Attempt = Pin<Box<dyn Future<Output = AttemptOutcome> + Send>>;

/// How an attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    UpToDate,
    /// Image verified and staged; the daemon must relock and restart.
    Installed { sha256: String, staged: PathBuf },
    Failed { during: AgentPhase, error: LatchError },
}

impl AttemptOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, AttemptOutcome::Installed { .. })
    }
}

/// Agent state folded into device status snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStatus {
    pub phase: AgentPhase,
    pub connectivity: Connectivity,
    pub registry_reachable: Option<bool>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_result: Option<AgentPhase>,
    pub last_error: Option<String>,
}

/// Check the declared checksum and length of a download.
///
/// Returns the verified checksum in lowercase hex.
pub fn verify_download(image: &DownloadedImage) -> Result<String> {
    let declared = image.declared_sha256.as_deref().ok_or_else(|| {
        LatchError::Integrity("registry sent no checksum header".to_string())
    })?;
    if let Some(expected) = image.content_length {
        let actual = image.bytes.len() as u64;
        if actual != expected {
            return Err(LatchError::Integrity(format!(
                "truncated download: got {} of {} bytes",
                actual, expected
            )));
        }
    }
    verify_sha256(&image.bytes, declared)?;
    Ok(declared.trim().to_ascii_lowercase())
}

// ============================================================================
// Staging
// ============================================================================

/// Directory where verified images wait for the supervisor.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staged_path(&self) -> PathBuf {
        self.dir.join(STAGED_IMAGE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(RESTART_MARKER)
    }

    /// Whether an image is staged and flagged for restart.
    pub fn is_pending(&self) -> bool {
        self.staged_path().exists() && self.marker_path().exists()
    }

    /// Write `bytes` to `staged.bin`, re-read it, then write the restart marker.
    pub async fn stage(&self, bytes: &[u8], sha256: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            LatchError::Storage(format!(
                "cannot create staging dir {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let staged = self.staged_path();
        let tmp = self.dir.join(format!(".{}.tmp", STAGED_IMAGE));
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(LatchError::Storage(format!("failed to write staged image: {}", e)));
        }
        if let Err(e) = fs::rename(&tmp, &staged).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(LatchError::Storage(format!("failed to move staged image: {}", e)));
        }

        // Read back what landed on disk
        let written = fs::read(&staged).await?;
        if written.len() != bytes.len() || sha256_hex(&written) != sha256 {
            let _ = fs::remove_file(&staged).await;
            return Err(LatchError::Integrity(format!(
                "staged image does not match download ({} of {} bytes)",
                written.len(),
                bytes.len()
            )));
        }

        let marker = format!("{} {}\n", Utc::now().to_rfc3339(), sha256);
        fs::write(self.marker_path(), marker).await.map_err(|e| {
            LatchError::Storage(format!("failed to write restart marker: {}", e))
        })?;

        info!("Staged {} bytes at {}", bytes.len(), staged.display());
        Ok(staged)
    }
}

// ============================================================================
// Agent
// ============================================================================

pub struct UpdateAgent<C> {
    client: Arc<C>,
    staging: StagingArea,
    running_version: String,
    attempt_timeout: Duration,
    phase: Arc<watch::Sender<AgentPhase>>,
    status: AgentStatus,
}

impl<C: RegistryClient + 'static> UpdateAgent<C> {
    pub fn new(
        client: Arc<C>,
        staging: StagingArea,
        running_version: impl Into<String>,
        attempt_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(AgentPhase::Idle);
        Self {
            client,
            staging,
            running_version: running_version.into(),
            attempt_timeout,
            phase: Arc::new(phase),
            status: AgentStatus::default(),
        }
    }

    pub fn running_version(&self) -> &str {
        &self.running_version
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase.borrow()
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            phase: self.phase(),
            ..self.status.clone()
        }
    }

    /// Start an attempt. The caller polls the returned future and hands the
    /// outcome to [`UpdateAgent::finish`].
    pub fn begin(&mut self) -> Attempt {
        self.status.last_check = Some(Utc::now());
        debug!("Update check started (running {})", self.running_version);

        let client = Arc::clone(&self.client);
        let staging = self.staging.clone();
        let running = self.running_version.clone();
        let phase = Arc::clone(&self.phase);
        let limit = self.attempt_timeout;

        Box::pin(async move {
            let result =
                tokio::time::timeout(limit, attempt(&*client, &staging, &running, &phase)).await;
            match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    let during = *phase.borrow();
                    AttemptOutcome::Failed {
                        during,
                        error: LatchError::Timeout(limit),
                    }
                }
            }
        })
    }

    /// Record an outcome. Only an install leaves the phase at `Installing`.
    pub fn finish(&mut self, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::UpToDate => {
                info!("Firmware up to date ({})", self.running_version);
                self.mark_reachable(true);
                self.status.last_result = Some(AgentPhase::UpToDate);
                self.status.last_error = None;
                self.phase.send_replace(AgentPhase::Idle);
            }
            AttemptOutcome::Installed { sha256, staged } => {
                info!("Update staged at {} (sha256 {})", staged.display(), sha256);
                self.mark_reachable(true);
                self.status.last_result = Some(AgentPhase::Installing);
                self.status.last_error = None;
                self.phase.send_replace(AgentPhase::Installing);
            }
            AttemptOutcome::Failed { during, error } => {
                warn!("Update attempt failed during {}: {}", during, error);
                self.mark_reachable(*during != AgentPhase::CheckingConnectivity);
                self.status.last_result = Some(AgentPhase::Failed);
                self.status.last_error = Some(error.to_string());
                self.phase.send_replace(AgentPhase::Idle);
            }
        }
    }

    /// Run one attempt to completion.
    pub async fn run_once(&mut self) -> AttemptOutcome {
        let outcome = self.begin().await;
        self.finish(&outcome);
        outcome
    }

    fn mark_reachable(&mut self, reachable: bool) {
        self.status.registry_reachable = Some(reachable);
        self.status.connectivity = if reachable {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        };
    }
}

async fn attempt<C: RegistryClient + ?Sized>(
    client: &C,
    staging: &StagingArea,
    running_version: &str,
    phase: &watch::Sender<AgentPhase>,
) -> AttemptOutcome {
    phase.send_replace(AgentPhase::CheckingConnectivity);
    if let Err(error) = client.check_connectivity().await {
        return AttemptOutcome::Failed {
            during: AgentPhase::CheckingConnectivity,
            error,
        };
    }

    phase.send_replace(AgentPhase::Negotiating);
    let image = match client.negotiate(running_version).await {
        Ok(Negotiation::NotModified) => return AttemptOutcome::UpToDate,
        Ok(Negotiation::Payload(image)) => image,
        Err(error) => {
            return AttemptOutcome::Failed {
                during: AgentPhase::Negotiating,
                error,
            }
        }
    };

    let sha256 = match verify_download(&image) {
        Ok(sha256) => sha256,
        Err(error) => {
            warn!("Discarding downloaded image: {}", error);
            return AttemptOutcome::Failed {
                during: AgentPhase::Negotiating,
                error,
            };
        }
    };

    phase.send_replace(AgentPhase::Installing);
    match staging.stage(&image.bytes, &sha256).await {
        Ok(staged) => AttemptOutcome::Installed { sha256, staged },
        Err(error) => AttemptOutcome::Failed {
            during: AgentPhase::Installing,
            error,
        },
    }
}
