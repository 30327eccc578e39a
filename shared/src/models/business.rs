//! Reference data consumed when composing tax documents

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::IdentityDocumentType;

/// The issuing company (read-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoEmpresa {
    pub ruc: String,
    pub razon_social: String,
    pub nombre_comercial: Option<String>,
    pub direccion: String,
}

/// The customer a pre-sale is billed to (read-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClienteRef {
    pub id: Uuid,
    pub numero_documento: String,
    pub razon_social: String,
    pub direccion: Option<String>,
}

impl ClienteRef {
    pub fn tipo_documento(&self) -> IdentityDocumentType {
        IdentityDocumentType::infer(&self.numero_documento)
    }
}
