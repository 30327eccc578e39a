//! Pre-sale handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::EditarPreventaInput;
use crate::services::preventa::PreventaDetalle;
use crate::services::PreventaService;
use crate::AppState;

/// Response for an applied edit
#[derive(Serialize)]
pub struct EditarPreventaResponse {
    pub success: bool,
    pub preventa: PreventaDetalle,
}

fn service(state: &AppState) -> PreventaService {
    PreventaService::new(
        state.db.clone(),
        &state.config.billing,
        state.certificate.clone(),
    )
}

/// Get a pre-sale with client, line items and bonuses
pub async fn get_preventa(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(preventa_id): Path<Uuid>,
) -> Result<Json<PreventaDetalle>, AppError> {
    let preventa = service(&state).get(preventa_id).await?;
    Ok(Json(preventa))
}

/// Edit a pending pre-sale
pub async fn update_preventa(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(preventa_id): Path<Uuid>,
    Json(input): Json<EditarPreventaInput>,
) -> Result<Json<EditarPreventaResponse>, AppError> {
    let preventa = service(&state).update(&user, preventa_id, input).await?;

    Ok(Json(EditarPreventaResponse {
        success: true,
        preventa,
    }))
}
