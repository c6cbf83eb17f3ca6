//! HTTP routes for otad.

use crate::registry::{FetchOutcome, Registry};
use axum::{
    extract::{multipart::MultipartError, ConnectInfo, Multipart, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use latch_common::{
    client_reported_version, FirmwareInfo, LatchError, VersionResponse, HEADER_FIRMWARE_VERSION,
    HEADER_LEGACY_VERSION, HEADER_SHA256, PATH_DELETE, PATH_FIRMWARE, PATH_LIST, PATH_UPLOAD,
    PATH_VERSION,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub registry: Registry,
    /// Log health probes too
    pub debug: bool,
}

impl AppState {
    pub fn new(registry: Registry, debug: bool) -> Self {
        Self { registry, debug }
    }
}

type AppStateArc = Arc<AppState>;

// ============================================================================
// Errors
// ============================================================================

/// Handler error, rendered as a plain-text body with the mapped status.
#[derive(Debug)]
pub enum ApiError {
    Registry(LatchError),
    Multipart(MultipartError),
}

impl From<LatchError> for ApiError {
    fn from(e: LatchError) -> Self {
        ApiError::Registry(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Multipart(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Registry(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    error!("{}", e);
                } else {
                    warn!("{}", e);
                }
                (status, e.to_string()).into_response()
            }
            ApiError::Multipart(e) => {
                warn!("Unable to parse form: {}", e.body_text());
                (e.status(), format!("Unable to parse form: {}", e.body_text())).into_response()
            }
        }
    }
}

// ============================================================================
// Request logging
// ============================================================================

fn is_health_check(req: &Request) -> bool {
    let kube_probe = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.contains("kube-probe"))
        .unwrap_or(false);
    kube_probe || req.uri().path() == PATH_VERSION
}

/// Log each request with its latency; health probes only in debug mode.
pub async fn log_request(State(state): State<AppStateArc>, req: Request, next: Next) -> Response {
    if !state.debug && is_health_check(&req) {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    info!(
        "{} {} - {} {} ({:?})",
        method,
        path,
        remote,
        response.status().as_u16(),
        start.elapsed()
    );
    response
}

// ============================================================================
// Firmware Routes
// ============================================================================

pub fn firmware_routes() -> Router<AppStateArc> {
    Router::new()
        .route(PATH_UPLOAD, post(upload_firmware))
        .route(PATH_FIRMWARE, get(get_firmware))
        .route(PATH_VERSION, get(get_version))
        .route(PATH_LIST, get(list_firmware))
        .route(PATH_DELETE, delete(delete_firmware))
}

/// `POST /upload`: multipart with a `firmware` file and a `version` field.
async fn upload_firmware(
    State(state): State<AppStateArc>,
    mut multipart: Multipart,
) -> Result<String, ApiError> {
    let mut version: Option<String> = None;
    let mut payload = None;
    let mut filename = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("firmware") => {
                filename = field.file_name().map(str::to_string);
                payload = Some(field.bytes().await?);
            }
            Some("version") => {
                version = Some(field.text().await?.trim().to_string());
            }
            _ => {}
        }
    }

    let version = version.unwrap_or_default();
    state
        .registry
        .upload(&version, payload.as_deref())
        .await?;

    info!(
        "Firmware v{} stored from {}",
        version,
        filename.as_deref().unwrap_or("unnamed upload")
    );
    Ok(format!("Firmware version {} uploaded successfully", version))
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub version: Option<String>,
}

impl VersionQuery {
    /// `?version=` with an empty value counts as absent.
    fn version(&self) -> Option<&str> {
        self.version.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `GET /firmware[?version=V]`
async fn get_firmware(
    State(state): State<AppStateArc>,
    Query(query): Query<VersionQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client_version = client_reported_version(
        header_str(&headers, HEADER_FIRMWARE_VERSION),
        header_str(&headers, HEADER_LEGACY_VERSION),
        header_str(&headers, header::USER_AGENT.as_str()),
    );

    let outcome = state
        .registry
        .fetch(query.version(), client_version.as_deref())
        .await?;

    match outcome {
        FetchOutcome::NotModified { .. } => Ok(StatusCode::NOT_MODIFIED.into_response()),
        FetchOutcome::Payload(payload) => {
            let mut response = payload.bytes.into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=firmware.bin"),
            );
            if let Ok(value) = HeaderValue::from_str(&payload.sha256) {
                headers.insert(HEADER_SHA256, value);
            }
            Ok(response)
        }
    }
}

/// `GET /version`: cheap health/status probe.
async fn get_version(State(state): State<AppStateArc>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.registry.current_version().await.unwrap_or_default(),
    })
}

/// `GET /list`
async fn list_firmware(
    State(state): State<AppStateArc>,
) -> Result<Json<Vec<FirmwareInfo>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

/// `DELETE /delete?version=V`
async fn delete_firmware(
    State(state): State<AppStateArc>,
    Query(query): Query<VersionQuery>,
) -> Result<String, ApiError> {
    let version = query.version().unwrap_or_default().to_string();
    state.registry.delete(&version).await?;
    Ok(format!("Firmware version {} deleted successfully", version))
}
