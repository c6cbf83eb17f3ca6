//! Device status interface.
//!
//! Handlers never touch device state. Each request is forwarded to the
//! control loop over a channel and answered from the loop's reply, so a
//! snapshot always reflects the state at request time.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use latch_common::{DeviceStatus, UpdateTriggerResponse};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Pending status requests the loop will answer.
const REQUEST_QUEUE: usize = 16;

/// Request from the status interface to the control loop.
#[derive(Debug)]
pub enum StatusRequest {
    Snapshot(oneshot::Sender<DeviceStatus>),
    TriggerUpdate(oneshot::Sender<UpdateTriggerResponse>),
}

/// Sending side held by the HTTP handlers.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: mpsc::Sender<StatusRequest>,
}

impl StatusHandle {
    pub fn channel() -> (Self, mpsc::Receiver<StatusRequest>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        (Self { tx }, rx)
    }

    /// `None` when the control loop is gone.
    pub async fn snapshot(&self) -> Option<DeviceStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StatusRequest::Snapshot(reply)).await.ok()?;
        rx.await.ok()
    }

    pub async fn trigger_update(&self) -> Option<UpdateTriggerResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StatusRequest::TriggerUpdate(reply)).await.ok()?;
        rx.await.ok()
    }
}

type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

fn loop_gone() -> (StatusCode, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "device control loop is not running".to_string(),
    )
}

pub fn status_routes() -> Router<StatusHandle> {
    Router::new()
        .route("/status", get(get_status))
        .route("/update", post(trigger_update))
        .route("/health", get(health))
}

pub fn build_router(handle: StatusHandle) -> Router {
    status_routes()
        .with_state(handle)
        .layer(TraceLayer::new_for_http())
}

async fn get_status(State(handle): State<StatusHandle>) -> ApiResult<Json<DeviceStatus>> {
    handle.snapshot().await.map(Json).ok_or_else(loop_gone)
}

async fn trigger_update(
    State(handle): State<StatusHandle>,
) -> ApiResult<(StatusCode, Json<UpdateTriggerResponse>)> {
    let response = handle.trigger_update().await.ok_or_else(loop_gone)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Serve the status interface until the process exits.
pub async fn serve(listener: TcpListener, handle: StatusHandle) -> Result<()> {
    info!("Status interface on http://{}", listener.local_addr()?);
    axum::serve(listener, build_router(handle)).await?;
    Ok(())
}
