//! Document series handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::AllocatedNumber;
use crate::services::series::SerieDocumento;
use crate::services::SeriesService;
use crate::AppState;

/// Role allowed to hand out numbers outside the edit workflow
const ALLOCATOR_ROLE: &str = "ADMIN";

#[derive(Serialize)]
pub struct SeriesResponse {
    pub series: Vec<SerieDocumento>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub tipo_comprobante: String,
}

fn service(state: &AppState) -> SeriesService {
    SeriesService::new(state.db.clone(), state.config.billing.series_defaults())
}

/// List document series
pub async fn list_series(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<SeriesResponse>, AppError> {
    let series = service(&state).list().await?;
    Ok(Json(SeriesResponse { series }))
}

/// Allocate the next number for a document class
pub async fn allocate_number(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<AllocateRequest>,
) -> Result<(StatusCode, Json<AllocatedNumber>), AppError> {
    if !user.has_role(ALLOCATOR_ROLE) {
        return Err(AppError::InsufficientPermissions);
    }

    let allocated = service(&state).allocate(&request.tipo_comprobante).await?;
    Ok((StatusCode::CREATED, Json(allocated)))
}
