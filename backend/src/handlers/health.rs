//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    /// Whether composed documents are being signed
    pub signing: &'static str,
}

/// Reports database connectivity; unhealthy responses use 503
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_up = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    let (status, label) = if database_up {
        (StatusCode::OK, "healthy")
    } else {
        tracing::warn!("Health check could not reach the database");
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            database: if database_up { "connected" } else { "disconnected" },
            signing: if state.certificate.is_some() { "enabled" } else { "disabled" },
        }),
    )
}
