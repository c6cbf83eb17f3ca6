//! latchctl client tests against in-process registry and device servers.

use latch_common::{sha256_hex, LockState};
use latchctl::client::{DeviceClient, Fetched, RegistryAdmin};
use latchd::actuator::FakeActuator;
use latchd::agent::{StagingArea, UpdateAgent};
use latchd::client::FakeRegistryClient;
use latchd::config::{UpdateConfig, UpdateMode};
use latchd::daemon::Device;
use latchd::lock::LockController;
use latchd::status::{self, StatusHandle};
use otad::config::RegistryConfig;
use otad::server::{build_router, init_state};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, UdpSocket};

async fn start_registry() -> (String, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = RegistryConfig {
        firmware_dir: tmp.path().join("firmware"),
        initial_version: String::new(),
        ..RegistryConfig::default()
    };
    let app = build_router(init_state(&config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), tmp)
}

#[tokio::test]
async fn test_registry_admin_round_trip() {
    let (url, _tmp) = start_registry().await;
    let registry = RegistryAdmin::new(&url).unwrap();

    assert_eq!(registry.current().await.unwrap(), None);

    registry.upload("1.0.0", b"first".to_vec(), "a.bin").await.unwrap();
    registry.upload("1.1.0", b"second".to_vec(), "b.bin").await.unwrap();
    assert_eq!(registry.current().await.unwrap().as_deref(), Some("1.1.0"));

    let images = registry.list().await.unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images.iter().filter(|i| i.is_current).count(), 1);

    match registry.fetch(None, None).await.unwrap() {
        Fetched::Image { bytes, sha256 } => {
            assert_eq!(bytes, b"second");
            assert_eq!(sha256, sha256_hex(b"second"));
        }
        Fetched::NotModified => panic!("expected an image"),
    }
    assert_eq!(
        registry.fetch(None, Some("1.1.0")).await.unwrap(),
        Fetched::NotModified
    );

    registry.delete("1.0.0").await.unwrap();
    assert_eq!(registry.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_registry_errors_carry_server_message() {
    let (url, _tmp) = start_registry().await;
    let registry = RegistryAdmin::new(&url).unwrap();

    let err = registry.delete("9.9.9").await.unwrap_err();
    assert!(err.to_string().contains("404"), "got: {}", err);

    let err = registry.upload("../evil", b"x".to_vec(), "x.bin").await.unwrap_err();
    assert!(err.to_string().contains("400"), "got: {}", err);
}

#[tokio::test]
async fn test_device_commands_and_status() {
    let tmp = tempfile::tempdir().unwrap();
    let update = UpdateConfig {
        mode: UpdateMode::Manual,
        ..UpdateConfig::default()
    };
    let agent = UpdateAgent::new(
        Arc::new(FakeRegistryClient::not_modified()),
        StagingArea::new(tmp.path()),
        "1.0.0",
        Duration::from_secs(5),
    );
    let lock = LockController::new(FakeActuator::new(), Duration::from_secs(30));
    let device = Device::new(lock, agent, &update, tokio::time::Instant::now());

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let command_addr = socket.local_addr().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let status_addr = listener.local_addr().unwrap();

    let (handle, requests) = StatusHandle::channel();
    tokio::spawn(status::serve(listener, handle));
    tokio::spawn(device.run(socket, requests, std::future::pending::<()>()));

    let client = DeviceClient::new(
        command_addr.to_string(),
        &format!("http://{}", status_addr),
    )
    .unwrap();

    client.send_command("unlock").await.unwrap();
    let mut status = client.status().await.unwrap();
    for _ in 0..100 {
        if status.unlock_count == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = client.status().await.unwrap();
    }
    assert_eq!(status.unlock_count, 1);
    assert_eq!(status.lock_state, LockState::Unlocked);
    assert_eq!(status.running_version, "1.0.0");

    client.send_command("lock").await.unwrap();
    for _ in 0..100 {
        if client.status().await.unwrap().lock_state == LockState::Locked {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.status().await.unwrap().lock_state, LockState::Locked);

    let response = client.trigger_update().await.unwrap();
    assert!(response.accepted);
}
