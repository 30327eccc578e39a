//! Line item reconciliation for pre-sale edits
//!
//! Turns the edited product and bonus lists into fully priced line items and
//! recomputes the pre-sale totals. The result always replaces the stored
//! collections wholesale; nothing here diffs against the previous rows.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BonificacionEditada, ProductoEditado};
use crate::types::{TaxAffectation, DEFAULT_UNIT_CODE};
use crate::validation::{parse_optional_decimal, parse_quantity};

/// Errors raised while reconciling an edit
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("Invalid number in {field}: {value}")]
    InvalidNumber { field: String, value: String },

    #[error("Quantity in {field} cannot be negative")]
    NegativeQuantity { field: String },

    #[error("Amount out of range in {field}")]
    Overflow { field: String },

    #[error("Unknown product: {0}")]
    UnknownProduct(Uuid),
}

impl ReconcileError {
    /// Payload field the error refers to, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            ReconcileError::InvalidNumber { field, .. } => Some(field),
            ReconcileError::NegativeQuantity { field } => Some(field),
            ReconcileError::Overflow { field } => Some(field),
            ReconcileError::UnknownProduct(_) => None,
        }
    }
}

/// Catalog data the reconciler needs: price per (product, unit) and each
/// product's default unit
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    prices: HashMap<(Uuid, String), Decimal>,
    default_units: HashMap<Uuid, String>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product and its default unit of measure
    pub fn with_product(mut self, producto_id: Uuid, unidad: impl Into<String>) -> Self {
        self.insert_product(producto_id, unidad);
        self
    }

    /// Register the price of a product in a given unit
    pub fn with_price(mut self, producto_id: Uuid, unidad: impl Into<String>, precio: Decimal) -> Self {
        self.insert_price(producto_id, unidad, precio);
        self
    }

    pub fn insert_product(&mut self, producto_id: Uuid, unidad: impl Into<String>) {
        self.default_units.insert(producto_id, unidad.into());
    }

    pub fn insert_price(&mut self, producto_id: Uuid, unidad: impl Into<String>, precio: Decimal) {
        self.prices.insert((producto_id, unidad.into()), precio);
    }

    pub fn knows(&self, producto_id: Uuid) -> bool {
        self.default_units.contains_key(&producto_id)
    }

    pub fn unit_price(&self, producto_id: Uuid, unidad: &str) -> Option<Decimal> {
        self.prices.get(&(producto_id, unidad.to_string())).copied()
    }

    pub fn default_unit(&self, producto_id: Uuid) -> &str {
        self.default_units
            .get(&producto_id)
            .map(String::as_str)
            .unwrap_or(DEFAULT_UNIT_CODE)
    }
}

/// A priced line item ready to be written as a `detalle_preventa` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineaReconciliada {
    pub producto_id: Uuid,
    pub unidad_medida: String,
    pub cantidad: Decimal,
    pub precio_unitario: Decimal,
    pub total: Decimal,
    pub tipo_afectacion: TaxAffectation,
    pub descuento: Decimal,
}

impl LineaReconciliada {
    /// Tax this line contributes to the pre-sale
    pub fn igv(&self) -> Decimal {
        self.total * self.tipo_afectacion.rate()
    }
}

/// A free-goods line ready to be written as a `bonificacion` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonificacionReconciliada {
    pub producto_id: Uuid,
    pub unidad_medida: String,
    pub cantidad: Decimal,
}

/// Monetary totals of a pre-sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totales {
    pub subtotal: Decimal,
    pub igv: Decimal,
    pub descuento: Decimal,
    pub total: Decimal,
    pub base_imponible: Decimal,
    pub valor_venta: Decimal,
}

/// Add up amounts, failing instead of overflowing
pub fn checked_sum(
    field: &str,
    amounts: impl IntoIterator<Item = Decimal>,
) -> Result<Decimal, ReconcileError> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| ReconcileError::Overflow { field: field.to_string() })
}

impl Totales {
    /// Sum a set of priced lines into pre-sale totals
    pub fn from_lines(lineas: &[LineaReconciliada]) -> Result<Self, ReconcileError> {
        let subtotal = checked_sum("subtotal", lineas.iter().map(|l| l.total))?;
        let igv = checked_sum("igv", lineas.iter().map(LineaReconciliada::igv))?;
        let descuento = checked_sum("descuento", lineas.iter().map(|l| l.descuento))?;
        let total = subtotal
            .checked_add(igv)
            .ok_or_else(|| ReconcileError::Overflow { field: "total".to_string() })?;

        Ok(Self {
            subtotal,
            igv,
            descuento,
            total,
            base_imponible: subtotal,
            valor_venta: subtotal,
        })
    }

    /// Sum of the line totals for lines with the given affectation
    pub fn taxable_amount(
        lineas: &[LineaReconciliada],
        afectacion: TaxAffectation,
    ) -> Result<Decimal, ReconcileError> {
        checked_sum(
            "baseImponible",
            lineas
                .iter()
                .filter(|l| l.tipo_afectacion == afectacion)
                .map(|l| l.total),
        )
    }
}

/// Outcome of reconciling one edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub preventa_id: Uuid,
    pub totales: Totales,
    pub lineas: Vec<LineaReconciliada>,
    pub bonificaciones: Vec<BonificacionReconciliada>,
}

/// Prices edited lines against a catalog and recomputes totals
#[derive(Debug, Clone)]
pub struct LineItemReconciler<'a> {
    catalog: &'a PriceBook,
}

impl<'a> LineItemReconciler<'a> {
    pub fn new(catalog: &'a PriceBook) -> Self {
        Self { catalog }
    }

    /// Reconcile an edit. Any malformed field fails the whole call.
    pub fn reconcile(
        &self,
        preventa_id: Uuid,
        productos: &[ProductoEditado],
        bonificaciones: &[BonificacionEditada],
    ) -> Result<Reconciliation, ReconcileError> {
        let lineas = productos
            .iter()
            .enumerate()
            .map(|(idx, p)| self.price_line(idx, p))
            .collect::<Result<Vec<_>, _>>()?;

        let bonificaciones = bonificaciones
            .iter()
            .enumerate()
            .map(|(idx, b)| self.bonus_line(idx, b))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Reconciliation {
            preventa_id,
            totales: Totales::from_lines(&lineas)?,
            lineas,
            bonificaciones,
        })
    }

    fn price_line(&self, idx: usize, producto: &ProductoEditado) -> Result<LineaReconciliada, ReconcileError> {
        if !self.catalog.knows(producto.id) {
            return Err(ReconcileError::UnknownProduct(producto.id));
        }

        let cantidad = parse_quantity(&format!("productos[{idx}].cantidad"), &producto.cantidad)?;
        let precio_enviado = parse_optional_decimal(
            &format!("productos[{idx}].precioUnitario"),
            producto.precio_unitario.as_ref(),
        )?;
        let descuento = parse_optional_decimal(
            &format!("productos[{idx}].descuento"),
            producto.descuento.as_ref(),
        )?
        .unwrap_or(Decimal::ZERO);

        // Selected unit price wins, then the price sent by the client, then zero
        let precio_unitario = producto
            .unidad_seleccionada
            .as_deref()
            .and_then(|unidad| self.catalog.unit_price(producto.id, unidad))
            .or(precio_enviado)
            .unwrap_or(Decimal::ZERO);

        let unidad_medida = producto
            .unidad_seleccionada
            .clone()
            .unwrap_or_else(|| self.catalog.default_unit(producto.id).to_string());

        let total = cantidad
            .checked_mul(precio_unitario)
            .ok_or_else(|| ReconcileError::Overflow {
                field: format!("productos[{idx}].cantidad"),
            })?;

        Ok(LineaReconciliada {
            producto_id: producto.id,
            unidad_medida,
            cantidad,
            precio_unitario,
            total,
            tipo_afectacion: TaxAffectation::from_taxable(producto.tiene_igv),
            descuento,
        })
    }

    fn bonus_line(
        &self,
        idx: usize,
        bonificacion: &BonificacionEditada,
    ) -> Result<BonificacionReconciliada, ReconcileError> {
        if !self.catalog.knows(bonificacion.producto_id) {
            return Err(ReconcileError::UnknownProduct(bonificacion.producto_id));
        }

        let cantidad = parse_quantity(
            &format!("bonificaciones[{idx}].cantidad"),
            &bonificacion.cantidad,
        )?;
        let unidad_medida = bonificacion
            .unidad_medida
            .clone()
            .unwrap_or_else(|| self.catalog.default_unit(bonificacion.producto_id).to_string());

        Ok(BonificacionReconciliada {
            producto_id: bonificacion.producto_id,
            unidad_medida,
            cantidad,
        })
    }
}
