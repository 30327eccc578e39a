//! Pre-sale (preventa) models and the edit request shape

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Status of a pre-sale that still accepts edits
pub const ESTADO_PENDIENTE: &str = "pendiente";

/// Tax-document status of a pre-sale not yet sent to the tax authority
pub const ESTADO_SUNAT_PENDIENTE: &str = "PENDIENTE";

/// Whether a pre-sale can still go through the edit workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditState {
    Editable,
    Locked,
}

impl EditState {
    /// Only `pendiente` / `PENDIENTE` is editable; every other
    /// combination is locked
    pub fn of(estado: &str, estado_sunat: &str) -> Self {
        if estado == ESTADO_PENDIENTE && estado_sunat == ESTADO_SUNAT_PENDIENTE {
            EditState::Editable
        } else {
            EditState::Locked
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, EditState::Editable)
    }
}

/// A product line as sent by the edit screen
///
/// Numeric fields are kept as raw JSON so that strings such as `"2.5"` are
/// accepted and malformed input is reported per field during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductoEditado {
    pub id: Uuid,
    pub cantidad: Value,
    #[serde(default)]
    pub unidad_seleccionada: Option<String>,
    #[serde(default)]
    pub precio_unitario: Option<Value>,
    #[serde(rename = "tieneIGV")]
    pub tiene_igv: bool,
    #[serde(default)]
    pub descuento: Option<Value>,
}

/// A free-goods line as sent by the edit screen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonificacionEditada {
    pub producto_id: Uuid,
    pub cantidad: Value,
    #[serde(default)]
    pub unidad_medida: Option<String>,
}

/// Edit request for an existing pre-sale
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditarPreventaInput {
    /// Optional echo of the path id; must match when present
    #[serde(default)]
    pub preventa_id: Option<Uuid>,
    #[validate(length(min = 1, message = "At least one product is required"))]
    pub productos: Vec<ProductoEditado>,
    #[serde(default)]
    pub bonificaciones: Vec<BonificacionEditada>,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub metodo_pago: String,
    #[validate(length(min = 1, message = "Sale type is required"))]
    pub tipo_venta: String,
    #[serde(default)]
    pub notas: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_pending_pair_is_editable() {
        assert_eq!(EditState::of("pendiente", "PENDIENTE"), EditState::Editable);
        assert_eq!(EditState::of("completado", "PENDIENTE"), EditState::Locked);
        assert_eq!(EditState::of("pendiente", "ACEPTADO"), EditState::Locked);
        assert_eq!(EditState::of("PENDIENTE", "PENDIENTE"), EditState::Locked);
    }

    #[test]
    fn deserializes_edit_request_shape() {
        let body = json!({
            "preventaId": "7f0b8a0e-6c4e-4f57-9d43-5a1f2f6c0a11",
            "productos": [
                { "id": "0d7c1f5e-0c8e-4b9f-9a55-3d2b8c9e1f20", "cantidad": "2",
                  "unidadSeleccionada": "NIU", "precioUnitario": 10, "tieneIGV": true }
            ],
            "bonificaciones": [
                { "productoId": "0d7c1f5e-0c8e-4b9f-9a55-3d2b8c9e1f20", "cantidad": 1 }
            ],
            "metodoPago": "EFECTIVO",
            "tipoVenta": "CONTADO",
            "notas": null
        });

        let input: EditarPreventaInput = serde_json::from_value(body).unwrap();
        assert_eq!(input.productos.len(), 1);
        assert!(input.productos[0].tiene_igv);
        assert_eq!(input.bonificaciones.len(), 1);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn empty_products_fail_validation() {
        let input = EditarPreventaInput {
            preventa_id: None,
            productos: vec![],
            bonificaciones: vec![],
            metodo_pago: "EFECTIVO".to_string(),
            tipo_venta: "CONTADO".to_string(),
            notas: None,
        };
        assert!(input.validate().is_err());
    }
}
