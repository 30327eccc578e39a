//! Warehouse stock adjustment for pre-sale edits

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{compute_stock_deltas, OrderedQuantity, StockDelta};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppResult;

/// What an adjustment pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct StockAdjustment {
    pub applied: Vec<AppliedDelta>,
    /// Cells that do not exist for this warehouse; left untouched
    pub skipped: Vec<StockDelta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedDelta {
    pub producto_id: Uuid,
    pub unidad_medida: String,
    pub delta: Decimal,
    pub stock: Decimal,
}

/// Apply the stock deltas between the prior and new order lines of a
/// pre-sale, inside the caller's transaction.
///
/// Every call moves stock; running the same edit twice adjusts twice. The
/// caller holds the pre-sale row lock so the prior quantities cannot go
/// stale underneath it.
pub async fn adjust(
    conn: &mut PgConnection,
    almacen_id: Uuid,
    prior: &[OrderedQuantity],
    new: &[OrderedQuantity],
) -> AppResult<StockAdjustment> {
    let mut adjustment = StockAdjustment::default();

    for delta in compute_stock_deltas(prior, new)? {
        let stock = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE producto_almacen_unidad_medida
            SET stock = stock - $1, updated_at = NOW()
            WHERE producto_id = $2 AND almacen_id = $3 AND unidad_medida = $4
            RETURNING stock
            "#,
        )
        .bind(delta.delta)
        .bind(delta.producto_id)
        .bind(almacen_id)
        .bind(&delta.unidad_medida)
        .fetch_optional(&mut *conn)
        .await?;

        match stock {
            Some(stock) => {
                tracing::debug!(
                    producto_id = %delta.producto_id,
                    unidad = %delta.unidad_medida,
                    delta = %delta.delta,
                    stock = %stock,
                    "Applied stock delta"
                );
                adjustment.applied.push(AppliedDelta {
                    producto_id: delta.producto_id,
                    unidad_medida: delta.unidad_medida,
                    delta: delta.delta,
                    stock,
                });
            }
            None => {
                tracing::warn!(
                    producto_id = %delta.producto_id,
                    almacen_id = %almacen_id,
                    unidad = %delta.unidad_medida,
                    "No stock cell for product in warehouse, skipping adjustment"
                );
                adjustment.skipped.push(delta);
            }
        }
    }

    Ok(adjustment)
}
