//! Terminal output - ASCII only, colored status tags

use latch_common::{AgentPhase, Connectivity, DeviceStatus, FirmwareInfo, LockState};
use owo_colors::OwoColorize;

/// Human-readable byte count.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn lock_tag(state: LockState) -> String {
    match state {
        LockState::Locked => "[LOCKED]".bright_green().to_string(),
        LockState::Unlocked => "[UNLOCKED]".yellow().to_string(),
    }
}

fn connectivity_tag(connectivity: Connectivity) -> String {
    match connectivity {
        Connectivity::Connected => "connected".bright_green().to_string(),
        Connectivity::Disconnected => "disconnected".bright_red().to_string(),
        Connectivity::Unknown => "unknown".dimmed().to_string(),
    }
}

fn phase_tag(phase: AgentPhase) -> String {
    match phase {
        AgentPhase::Failed => phase.as_str().bright_red().to_string(),
        AgentPhase::UpToDate => phase.as_str().bright_green().to_string(),
        p if p.is_active() => p.as_str().cyan().to_string(),
        p => p.as_str().to_string(),
    }
}

pub fn render_status(status: &DeviceStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} firmware {}, up {}s\n",
        lock_tag(status.lock_state),
        status.running_version.bold(),
        status.uptime_secs
    ));
    out.push_str(&format!("  Unlocks:      {}\n", status.unlock_count));
    out.push_str(&format!(
        "  Registry:     {}\n",
        connectivity_tag(status.connectivity)
    ));
    out.push_str(&format!("  Update agent: {}\n", phase_tag(status.agent_phase)));
    if let Some(result) = status.last_update_result {
        out.push_str(&format!("  Last result:  {}\n", phase_tag(result)));
    }
    match status.last_update_check {
        Some(at) => out.push_str(&format!("  Last check:   {}\n", at.to_rfc3339())),
        None => out.push_str("  Last check:   never\n"),
    }
    if let Some(error) = &status.last_update_error {
        out.push_str(&format!("  {} {}\n", "[ERROR]".bright_red(), error));
    }
    out
}

pub fn render_firmware_list(images: &[FirmwareInfo]) -> String {
    if images.is_empty() {
        return "No firmware images stored\n".to_string();
    }
    let width = images.iter().map(|i| i.version.len()).max().unwrap_or(0).max(7);
    let mut out = format!("  {:<width$}  {:>10}  {:<25}  {}\n", "VERSION", "SIZE", "MODIFIED", "SHA256");
    for image in images {
        let marker = if image.is_current {
            "*".bright_green().to_string()
        } else {
            " ".to_string()
        };
        out.push_str(&format!(
            "{} {:<width$}  {:>10}  {:<25}  {}\n",
            marker,
            image.version,
            human_size(image.size),
            image.modified,
            image.sha256.chars().take(16).collect::<String>(),
        ));
    }
    out
}
