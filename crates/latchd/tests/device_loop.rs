//! Device loop tests
//!
//! Drive `Device` with a recording actuator and a canned registry client.
//! The last test runs the real loop over a UDP socket and the status channel.

use latch_common::{sha256_hex, AgentPhase, Connectivity, DeviceStatus, LockState};
use latchd::actuator::{ActuatorEvent, FakeActuator};
use latchd::agent::{StagingArea, UpdateAgent};
use latchd::client::{FakeNegotiation, FakeRegistryClient};
use latchd::config::{UpdateConfig, UpdateMode};
use latchd::daemon::{Device, ExitReason};
use latchd::lock::LockController;
use latchd::status::StatusHandle;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::time::Instant;

const PULSE: Duration = Duration::from_millis(3000);
const RUNNING: &str = "1.0.0";

struct Rig {
    device: Device<FakeActuator, FakeRegistryClient>,
    actuator: FakeActuator,
    client: Arc<FakeRegistryClient>,
    staging: StagingArea,
    _tmp: TempDir,
}

fn rig_with(client: FakeRegistryClient, pulse: Duration, attempt_timeout: Duration) -> Rig {
    let tmp = tempfile::tempdir().unwrap();
    let staging = StagingArea::new(tmp.path().join("staging"));
    let client = Arc::new(client);
    let update = UpdateConfig {
        mode: UpdateMode::Manual,
        jitter_secs: 0,
        ..UpdateConfig::default()
    };
    let agent = UpdateAgent::new(Arc::clone(&client), staging.clone(), RUNNING, attempt_timeout);
    let actuator = FakeActuator::new();
    let lock = LockController::new(actuator.clone(), pulse);

    Rig {
        device: Device::new(lock, agent, &update, Instant::now()),
        actuator,
        client,
        staging,
        _tmp: tmp,
    }
}

fn rig(client: FakeRegistryClient) -> Rig {
    rig_with(client, PULSE, Duration::from_secs(5))
}

/// Trigger a check and run it to completion.
async fn run_update(rig: &mut Rig) -> Option<ExitReason> {
    let now = Instant::now();
    rig.device.trigger_update(now);
    rig.device.run_due(now);
    assert!(rig.device.update_in_flight());
    rig.device.settle_update().await
}

// ============================================================================
// Command / Actuator
// ============================================================================

#[tokio::test]
async fn test_unlock_then_pulse_relocks() {
    let mut rig = rig(FakeRegistryClient::not_modified());
    let t0 = Instant::now();

    rig.device.handle_datagram(b"unlock\n", t0);
    assert_eq!(rig.device.lock_state(), LockState::Unlocked);
    assert_eq!(rig.device.next_deadline(), Some(t0 + PULSE));

    rig.device.run_due(t0 + PULSE);

    assert_eq!(rig.device.lock_state(), LockState::Locked);
    assert_eq!(rig.device.unlock_count(), 1);
    assert_eq!(rig.device.next_deadline(), None);
    assert_eq!(rig.actuator.count(ActuatorEvent::Energized), 1);
}

#[tokio::test]
async fn test_lock_while_locked_does_not_toggle_actuator() {
    let mut rig = rig(FakeRegistryClient::not_modified());
    let before = rig.actuator.events();

    rig.device.handle_datagram(b"lock", Instant::now());
    rig.device.handle_datagram(b"lock", Instant::now());

    assert_eq!(rig.actuator.events(), before);
    assert_eq!(rig.device.lock_state(), LockState::Locked);
    assert_eq!(rig.device.unlock_count(), 0);
}

#[tokio::test]
async fn test_pulse_not_cut_short_by_early_poll() {
    let mut rig = rig(FakeRegistryClient::not_modified());
    let t0 = Instant::now();

    rig.device.handle_datagram(b"unlock", t0);
    rig.device.run_due(t0 + PULSE - Duration::from_millis(1));
    assert_eq!(rig.device.lock_state(), LockState::Unlocked);
}

// ============================================================================
// Update Agent
// ============================================================================

#[tokio::test]
async fn test_connectivity_down_fails_without_negotiating() {
    let mut rig = rig(FakeRegistryClient::unreachable());

    assert_eq!(run_update(&mut rig).await, None);

    let status = rig.device.snapshot(Instant::now());
    assert_eq!(status.running_version, RUNNING);
    assert_eq!(status.agent_phase, AgentPhase::Idle);
    assert_eq!(status.last_update_result, Some(AgentPhase::Failed));
    assert_eq!(status.connectivity, Connectivity::Disconnected);
    assert_eq!(status.registry_reachable, Some(false));
    assert!(status.last_update_error.is_some());

    assert_eq!(rig.client.connectivity_calls(), 1);
    assert_eq!(rig.client.negotiate_calls(), 0);
    assert!(!rig.staging.is_pending());
}

#[tokio::test]
async fn test_checksum_mismatch_stages_nothing() {
    let client = FakeRegistryClient::serving_with_checksum(b"new image", &sha256_hex(b"other"));
    let mut rig = rig(client);

    assert_eq!(run_update(&mut rig).await, None);

    let status = rig.device.snapshot(Instant::now());
    assert_eq!(status.last_update_result, Some(AgentPhase::Failed));
    assert_eq!(status.connectivity, Connectivity::Connected);
    assert!(status
        .last_update_error
        .as_deref()
        .unwrap_or_default()
        .contains("mismatch"));
    assert!(!rig.staging.staged_path().exists());
    assert!(!rig.staging.marker_path().exists());
}

#[tokio::test]
async fn test_up_to_date_reports_status_only() {
    let mut rig = rig(FakeRegistryClient::not_modified());

    assert_eq!(run_update(&mut rig).await, None);

    let status = rig.device.snapshot(Instant::now());
    assert_eq!(status.last_update_result, Some(AgentPhase::UpToDate));
    assert_eq!(status.last_update_error, None);
    assert_eq!(rig.client.negotiate_calls(), 1);
    // Manual mode: nothing rescheduled
    assert_eq!(rig.device.update_due_at(), None);
}

#[tokio::test]
async fn test_install_stages_relocks_and_restarts() {
    let mut rig = rig(FakeRegistryClient::serving(b"new image"));
    rig.device.handle_datagram(b"unlock", Instant::now());

    assert_eq!(run_update(&mut rig).await, Some(ExitReason::Restart));

    assert_eq!(std::fs::read(rig.staging.staged_path()).unwrap(), b"new image");
    assert!(rig.staging.is_pending());
    assert_eq!(rig.device.lock_state(), LockState::Locked);
    assert_eq!(rig.actuator.events().last(), Some(&ActuatorEvent::DeEnergized));

    let status = rig.device.snapshot(Instant::now());
    assert_eq!(status.agent_phase, AgentPhase::Installing);
}

#[tokio::test]
async fn test_no_current_image_is_a_failure() {
    let mut rig = rig(FakeRegistryClient::new(true, FakeNegotiation::NotFound));

    assert_eq!(run_update(&mut rig).await, None);

    let status = rig.device.snapshot(Instant::now());
    assert_eq!(status.last_update_result, Some(AgentPhase::Failed));
    assert_eq!(status.registry_reachable, Some(true));
}

#[tokio::test]
async fn test_trigger_while_running_does_not_restart_attempt() {
    let mut rig = rig(FakeRegistryClient::not_modified());
    let now = Instant::now();
    rig.device.trigger_update(now);
    rig.device.run_due(now);

    let response = rig.device.trigger_update(now);
    assert!(response.accepted);
    assert!(response.message.contains("already running"));
    assert_eq!(rig.device.update_due_at(), None);

    rig.device.settle_update().await;
    assert_eq!(rig.client.connectivity_calls(), 1);
}

// ============================================================================
// Full Loop
// ============================================================================

async fn wait_for<F>(handle: &StatusHandle, mut check: F) -> DeviceStatus
where
    F: FnMut(&DeviceStatus) -> bool,
{
    for _ in 0..200 {
        let status = handle.snapshot().await.expect("loop answered");
        if check(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("device never reached the expected state");
}

#[tokio::test]
async fn test_commands_served_while_update_in_flight() {
    let rig = rig_with(
        FakeRegistryClient::new(true, FakeNegotiation::Stall),
        Duration::from_millis(100),
        Duration::from_secs(30),
    );

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_addr = socket.local_addr().unwrap();
    let (handle, requests) = StatusHandle::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let device = rig.device;
    let running = tokio::spawn(async move {
        device
            .run(socket, requests, async {
                let _ = stop_rx.await;
            })
            .await
    });

    let response = handle.trigger_update().await.unwrap();
    assert!(response.accepted);
    wait_for(&handle, |s| s.agent_phase == AgentPhase::Negotiating).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(b"unlock", device_addr).await.unwrap();

    let status = wait_for(&handle, |s| s.unlock_count == 1).await;
    assert_eq!(status.agent_phase, AgentPhase::Negotiating);

    wait_for(&handle, |s| s.lock_state == LockState::Locked).await;

    stop_tx.send(()).unwrap();
    assert_eq!(running.await.unwrap(), ExitReason::Shutdown);
    assert_eq!(rig.actuator.events().last(), Some(&ActuatorEvent::DeEnergized));
}
