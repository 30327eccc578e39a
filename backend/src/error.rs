//! Error handling for the pre-sale billing service
//!
//! Provides consistent error responses in English and Spanish

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{ComposeError, ReconcileError};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Identity errors
    #[error("Insufficient permissions")]
    InsufficientPermissions,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_es: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Reference data missing: {0}")]
    ReferenceDataMissing(String),

    // Business logic errors
    #[error("Edit not allowed: {0}")]
    EditNotAllowed(String),

    // Signing errors
    #[error("Invalid certificate credentials: {0}")]
    InvalidCredentials(String),

    // Database errors
    #[error("Storage error: {0}")]
    TransientStorage(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        let message_es = match &err {
            ReconcileError::Overflow { field } => format!("Monto fuera de rango en {}", field),
            _ => format!("Dato numérico inválido en {}", err.field().unwrap_or_default()),
        };
        match err.field() {
            Some(field) => AppError::Validation {
                field: field.to_string(),
                message: err.to_string(),
                message_es,
            },
            None => AppError::ValidationError(err.to_string()),
        }
    }
}

impl From<ComposeError> for AppError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Overflow { field } => AppError::Validation {
                message: format!("Amount out of range in {}", field),
                message_es: format!("Monto fuera de rango en {}", field),
                field,
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_es: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                ErrorDetail {
                    code: "INSUFFICIENT_PERMISSIONS".to_string(),
                    message_en: "You do not have permission to perform this action".to_string(),
                    message_es: "No tiene permisos para realizar esta acción".to_string(),
                    field: None,
                },
            ),
            AppError::Validation { field, message, message_es } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message_en: message.clone(),
                    message_es: message_es.clone(),
                    field: Some(field.clone()),
                },
            ),
            AppError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message_en: msg.clone(),
                    message_es: format!("Datos inválidos: {}", msg),
                    field: None,
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail {
                    code: "NOT_FOUND".to_string(),
                    message_en: format!("{} not found", resource),
                    message_es: format!("No se encontró {}", resource),
                    field: None,
                },
            ),
            AppError::ReferenceDataMissing(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail {
                    code: "REFERENCE_DATA_MISSING".to_string(),
                    message_en: format!("{} reference data is missing", resource),
                    message_es: format!("Faltan datos de referencia: {}", resource),
                    field: None,
                },
            ),
            AppError::EditNotAllowed(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "EDIT_NOT_ALLOWED".to_string(),
                    message_en: msg.clone(),
                    message_es: format!("La preventa no se puede editar: {}", msg),
                    field: None,
                },
            ),
            AppError::InvalidCredentials(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    code: "INVALID_CREDENTIALS".to_string(),
                    message_en: format!("Certificate bundle could not be opened: {}", msg),
                    message_es: "No se pudo abrir el certificado digital".to_string(),
                    field: None,
                },
            ),
            AppError::TransientStorage(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail {
                    code: "TRANSIENT_STORAGE_ERROR".to_string(),
                    message_en: "A storage error occurred, please retry the request".to_string(),
                    message_es: "Error de almacenamiento, vuelva a intentar".to_string(),
                    field: None,
                },
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message_en: msg.clone(),
                    message_es: "Error interno del servidor".to_string(),
                    field: None,
                },
            ),
        };

        // Log the error for debugging
        tracing::error!("Error: {:?}", self);

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
