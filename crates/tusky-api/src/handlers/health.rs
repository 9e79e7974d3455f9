//! Health check handlers and response types.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tusky_core::ErrorMetadata;
use utoipa::ToSchema;

use crate::state::AppState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    /// `<backend>: healthy`, `<backend>: timeout` or `<backend>: <error>`
    pub storage: String,
}

/// Service and storage health
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthCheckResponse),
        (status = 503, description = "Record store unreachable", body = HealthCheckResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = state.uploads.backend_type();
    let (healthy, storage) = match tokio::time::timeout(CHECK_TIMEOUT, state.uploads.probe()).await
    {
        Ok(Ok(())) => (true, format!("{}: healthy", backend)),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Storage health check failed");
            (false, format!("{}: {}", backend, e.client_message()))
        }
        Err(_) => {
            tracing::error!("Storage health check timed out");
            (false, format!("{}: timeout", backend))
        }
    };

    let (code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        code,
        Json(HealthCheckResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            storage,
        }),
    )
}

/// Liveness probe - process is running.
#[utoipa::path(
    get,
    path = "/live",
    tag = "health",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "alive" })),
    )
}
