//! Stock delta computation for pre-sale edits

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reconcile::ReconcileError;

/// Quantity of a product ordered in a given unit of measure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedQuantity {
    pub producto_id: Uuid,
    pub unidad_medida: String,
    pub cantidad: Decimal,
}

impl OrderedQuantity {
    pub fn new(producto_id: Uuid, unidad_medida: impl Into<String>, cantidad: Decimal) -> Self {
        Self {
            producto_id,
            unidad_medida: unidad_medida.into(),
            cantidad,
        }
    }
}

/// Change in ordered quantity for one stock cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub producto_id: Uuid,
    pub unidad_medida: String,
    pub previo: Decimal,
    pub nuevo: Decimal,
    /// `nuevo - previo`; positive means more goods leave the warehouse
    pub delta: Decimal,
}

fn totals_by_cell(lines: &[OrderedQuantity]) -> Result<BTreeMap<(Uuid, &str), Decimal>, ReconcileError> {
    let mut totals = BTreeMap::new();
    for line in lines {
        let total = totals
            .entry((line.producto_id, line.unidad_medida.as_str()))
            .or_insert(Decimal::ZERO);
        *total = total
            .checked_add(line.cantidad)
            .ok_or_else(|| ReconcileError::Overflow { field: "cantidad".to_string() })?;
    }
    Ok(totals)
}

/// Compute per-cell deltas between the prior and the new order lines.
///
/// Every product in the new set is settled across all of its cells: a cell
/// it no longer uses (the line switched unit) gets its prior quantity back,
/// and a cell it did not use before counts from zero. Products missing from
/// the new set are not touched. Zero deltas are dropped. The result is
/// ordered by (product, unit) so stock rows are always touched in the same
/// order.
pub fn compute_stock_deltas(
    prior: &[OrderedQuantity],
    new: &[OrderedQuantity],
) -> Result<Vec<StockDelta>, ReconcileError> {
    let prior = totals_by_cell(prior)?;
    let new = totals_by_cell(new)?;

    let kept: HashSet<Uuid> = new.keys().map(|(producto_id, _)| *producto_id).collect();
    let cells: BTreeSet<(Uuid, &str)> = new
        .keys()
        .copied()
        .chain(prior.keys().copied().filter(|(producto_id, _)| kept.contains(producto_id)))
        .collect();

    Ok(cells
        .into_iter()
        .filter_map(|cell| {
            let previo = prior.get(&cell).copied().unwrap_or(Decimal::ZERO);
            let nuevo = new.get(&cell).copied().unwrap_or(Decimal::ZERO);
            let delta = nuevo - previo;
            (!delta.is_zero()).then(|| StockDelta {
                producto_id: cell.0,
                unidad_medida: cell.1.to_string(),
                previo,
                nuevo,
                delta,
            })
        })
        .collect())
}

/// Stock after applying a delta: ordering more consumes stock, ordering
/// less gives it back
pub fn apply_stock_delta(stock: Decimal, delta: Decimal) -> Decimal {
    stock - delta
}
