use crate::config::ApiConfig;
use crate::events::{BatchReport, Disposition, S3Event};
use crate::mask_apply::MaskApplicationHandler;
use crate::mask_request::MaskRequestHandler;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub mask_request: Arc<MaskRequestHandler>,
    pub mask_application: Arc<MaskApplicationHandler>,
}

/// Create the webhook router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(health_check))
        .route("/events/uploads", post(upload_events))
        .route("/events/masks", post(mask_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Upload bucket notifications: request masks
async fn upload_events(
    State(state): State<AppState>,
    Json(event): Json<S3Event>,
) -> impl IntoResponse {
    respond(state.mask_request.handle(&event).await)
}

/// Mask bucket notifications: apply masks
async fn mask_events(
    State(state): State<AppState>,
    Json(event): Json<S3Event>,
) -> impl IntoResponse {
    respond(state.mask_application.handle(&event).await)
}

/// A retryable failure turns the response into a 500 so the sender redelivers.
/// Permanent failures are acknowledged; the body names every failed record.
fn respond(report: BatchReport) -> (StatusCode, Json<BatchReport>) {
    match report.disposition() {
        Disposition::Acknowledge => {
            if !report.is_success() {
                warn!(failed = report.failures.len(), "Batch finished with permanent failures");
            }
            (StatusCode::OK, Json(report))
        }
        Disposition::Redeliver => {
            warn!(failed = report.failures.len(), "Batch finished with retryable failures");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(report))
        }
    }
}

/// Start the notification webhook server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting notification webhook server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
