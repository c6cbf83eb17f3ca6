//! HTTP server for otad

use crate::config::RegistryConfig;
use crate::registry::Registry;
use crate::routes::{self, AppState};
use crate::store::FirmwareStore;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Room for multipart framing and the `version` field on top of the payload.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build the router with all firmware routes and layers.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .registry
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let state = Arc::new(state);

    Router::new()
        .merge(routes::firmware_routes())
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::log_request,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Open the store and build application state.
///
/// Fails when the firmware directory cannot be created.
pub async fn init_state(config: &RegistryConfig) -> Result<AppState> {
    let store = FirmwareStore::open(&config.firmware_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to initialize firmware directory {}",
                config.firmware_dir.display()
            )
        })?;
    let registry = Registry::new(store, config.initial_current(), config.max_upload_bytes);
    Ok(AppState::new(registry, config.debug))
}

/// Run the HTTP server until Ctrl-C.
pub async fn run(config: RegistryConfig) -> Result<()> {
    let state = init_state(&config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(
        "OTA registry listening on http://{} (firmware dir {}, debug={})",
        config.listen_addr,
        config.firmware_dir.display(),
        config.debug
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down gracefully");
    })
    .await?;
    Ok(())
}
