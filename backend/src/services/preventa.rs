//! Pre-sale (preventa) edit workflow
//!
//! An edit runs as one database transaction:
//! lock the pre-sale, check it is still editable, load reference data,
//! reconcile the edited lines, replace line items and bonuses, adjust
//! warehouse stock, assign a document number when missing, compose and
//! sign the tax document, then commit. Any error drops the transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{
    compose_invoice, submission_file_name, ClienteRef, Comprobante, DocumentClass, EditState,
    EditarPreventaInput, InfoEmpresa, LineItemReconciler, LineaComprobante, LineaReconciliada,
    OrderedQuantity, PriceBook, Reconciliation, SeriesDefaults,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use super::series::{allocate_in, parse_class};
use super::stock;
use super::xml_signer::CertificateBundle;
use crate::config::BillingConfig;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

/// Pre-sale service: reads and the edit workflow
#[derive(Clone)]
pub struct PreventaService {
    db: PgPool,
    series: SeriesDefaults,
    currency: String,
    utc_offset_hours: i32,
    certificate: Option<Arc<CertificateBundle>>,
}

/// Pre-sale row
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Preventa {
    pub id: Uuid,
    pub cliente_id: Uuid,
    pub almacen_id: Uuid,
    pub usuario_id: Uuid,
    pub estado: String,
    pub estado_sunat: String,
    pub metodo_pago: String,
    pub tipo_venta: String,
    pub notas: Option<String>,
    pub tipo_comprobante: Option<String>,
    pub serie_id: Option<Uuid>,
    pub numero_comprobante: Option<String>,
    pub subtotal: Decimal,
    pub igv: Decimal,
    pub descuento: Decimal,
    pub total: Decimal,
    pub base_imponible: Decimal,
    pub valor_venta: Decimal,
    pub xml: Option<String>,
    pub nombre_archivo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line item row, with the product's code and name
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DetallePreventa {
    pub id: Uuid,
    pub preventa_id: Uuid,
    pub producto_id: Uuid,
    pub producto_codigo: String,
    pub producto_nombre: String,
    pub unidad_medida: String,
    pub cantidad: Decimal,
    pub precio_unitario: Decimal,
    pub total: Decimal,
    pub tipo_afectacion: String,
    pub descuento: Decimal,
}

/// Bonus item row
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Bonificacion {
    pub id: Uuid,
    pub preventa_id: Uuid,
    pub producto_id: Uuid,
    pub producto_nombre: String,
    pub unidad_medida: String,
    pub cantidad: Decimal,
}

/// A pre-sale with its client, line items and bonuses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreventaDetalle {
    #[serde(flatten)]
    pub preventa: Preventa,
    pub cliente: Option<ClienteRef>,
    pub detalle_preventas: Vec<DetallePreventa>,
    pub bonificaciones: Vec<Bonificacion>,
}

#[derive(Debug, FromRow)]
struct EmpresaRow {
    ruc: String,
    razon_social: String,
    nombre_comercial: Option<String>,
    direccion: String,
}

#[derive(Debug, FromRow)]
struct ClienteRow {
    id: Uuid,
    numero_documento: String,
    razon_social: String,
    direccion: Option<String>,
}

#[derive(Debug, FromRow)]
struct ProductoRow {
    id: Uuid,
    codigo: String,
    nombre: String,
    unidad_medida: String,
}

#[derive(Debug, FromRow)]
struct PrecioRow {
    producto_id: Uuid,
    unidad_medida: String,
    precio: Decimal,
}

#[derive(Debug, FromRow)]
struct CantidadRow {
    producto_id: Uuid,
    unidad_medida: String,
    cantidad: Decimal,
}

impl From<EmpresaRow> for InfoEmpresa {
    fn from(row: EmpresaRow) -> Self {
        InfoEmpresa {
            ruc: row.ruc,
            razon_social: row.razon_social,
            nombre_comercial: row.nombre_comercial,
            direccion: row.direccion,
        }
    }
}

impl From<ClienteRow> for ClienteRef {
    fn from(row: ClienteRow) -> Self {
        ClienteRef {
            id: row.id,
            numero_documento: row.numero_documento,
            razon_social: row.razon_social,
            direccion: row.direccion,
        }
    }
}

/// Product codes and names for the document, plus the price book
struct Catalog {
    prices: PriceBook,
    productos: HashMap<Uuid, ProductoRow>,
}

impl PreventaService {
    /// Create a new PreventaService instance
    pub fn new(db: PgPool, billing: &BillingConfig, certificate: Option<Arc<CertificateBundle>>) -> Self {
        Self {
            db,
            series: billing.series_defaults(),
            currency: billing.currency.clone(),
            utc_offset_hours: billing.utc_offset_hours,
            certificate,
        }
    }

    /// Load a pre-sale with its client, line items and bonuses
    pub async fn get(&self, preventa_id: Uuid) -> AppResult<PreventaDetalle> {
        let mut conn = self.db.acquire().await?;
        load_detalle(&mut *conn, preventa_id).await
    }

    /// Apply an edit to a pre-sale and regenerate its tax document
    pub async fn update(
        &self,
        user: &AuthUser,
        preventa_id: Uuid,
        input: EditarPreventaInput,
    ) -> AppResult<PreventaDetalle> {
        input.validate()?;

        if let Some(body_id) = input.preventa_id {
            if body_id != preventa_id {
                return Err(AppError::Validation {
                    field: "preventaId".to_string(),
                    message: "Pre-sale id in body does not match the URL".to_string(),
                    message_es: "El id de la preventa no coincide con la URL".to_string(),
                });
            }
        }

        tracing::info!(
            preventa_id = %preventa_id,
            user_id = %user.user_id,
            user_almacen_id = ?user.almacen_id,
            productos = input.productos.len(),
            bonificaciones = input.bonificaciones.len(),
            "Editing pre-sale"
        );

        let mut tx = self.db.begin().await?;

        // 1. Lock the pre-sale and its current lines
        let preventa = lock_preventa(&mut *tx, preventa_id).await?;
        if !EditState::of(&preventa.estado, &preventa.estado_sunat).is_editable() {
            return Err(AppError::EditNotAllowed(format!(
                "pre-sale is {} / {}",
                preventa.estado, preventa.estado_sunat
            )));
        }
        let prior = prior_quantities(&mut *tx, preventa_id).await?;

        // 2. Reference data
        let empresa = load_empresa(&mut *tx).await?;
        let cliente = load_cliente(&mut *tx, preventa.cliente_id)
            .await?
            .ok_or_else(|| AppError::ReferenceDataMissing("Client".to_string()))?;

        // 3. Reconcile
        let product_ids: Vec<Uuid> = input
            .productos
            .iter()
            .map(|p| p.id)
            .chain(input.bonificaciones.iter().map(|b| b.producto_id))
            .collect();
        let catalog = load_catalog(&mut *tx, &product_ids).await?;
        let reconciliation = LineItemReconciler::new(&catalog.prices).reconcile(
            preventa_id,
            &input.productos,
            &input.bonificaciones,
        )?;

        // 4. Persist totals and replace child collections
        save_totals(&mut *tx, &reconciliation, &input).await?;
        replace_detalles(&mut *tx, &reconciliation).await?;
        replace_bonificaciones(&mut *tx, &reconciliation).await?;

        // 5. Stock
        let ordered: Vec<OrderedQuantity> = reconciliation
            .lineas
            .iter()
            .map(|l| OrderedQuantity::new(l.producto_id, l.unidad_medida.clone(), l.cantidad))
            .collect();
        let adjustment = stock::adjust(&mut *tx, preventa.almacen_id, &prior, &ordered).await?;

        // 6. Document number, then compose and sign
        let clase = match preventa.tipo_comprobante.as_deref() {
            Some(code) => parse_class(code)?,
            None => DocumentClass::for_customer(cliente.tipo_documento()),
        };
        let numero = match preventa.numero_comprobante.clone() {
            Some(numero) => numero,
            None => {
                let allocated = allocate_in(&mut *tx, clase, &self.series).await?;
                sqlx::query(
                    r#"
                    UPDATE preventa
                    SET tipo_comprobante = $2, serie_id = $3, numero_comprobante = $4
                    WHERE id = $1
                    "#,
                )
                .bind(preventa_id)
                .bind(clase.code())
                .bind(allocated.serie_id)
                .bind(&allocated.numero)
                .execute(&mut *tx)
                .await?;
                allocated.numero
            }
        };

        let emitido = self.issue_time()?;
        let comprobante = Comprobante {
            clase,
            numero: numero.clone(),
            emitido,
            moneda: self.currency.clone(),
            metodo_pago: input.metodo_pago.clone(),
            lineas: document_lines(&reconciliation.lineas, &catalog),
            totales: reconciliation.totales,
            emisor: empresa,
            cliente,
        };
        let xml = compose_invoice(&comprobante)?;
        let xml = match &self.certificate {
            Some(bundle) => bundle.sign(&xml)?,
            None => {
                tracing::debug!(preventa_id = %preventa_id, "No certificate configured, storing unsigned document");
                xml
            }
        };
        let nombre_archivo = submission_file_name(&comprobante.emisor.ruc, clase, &numero, emitido);

        sqlx::query(
            r#"
            UPDATE preventa
            SET xml = $2, nombre_archivo = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(preventa_id)
        .bind(&xml)
        .bind(&nombre_archivo)
        .execute(&mut *tx)
        .await?;

        // 7. Read back and commit
        let detalle = load_detalle(&mut *tx, preventa_id).await?;
        tx.commit().await?;

        tracing::info!(
            preventa_id = %preventa_id,
            numero = %numero,
            subtotal = %reconciliation.totales.subtotal,
            igv = %reconciliation.totales.igv,
            total = %reconciliation.totales.total,
            stock_applied = adjustment.applied.len(),
            stock_skipped = adjustment.skipped.len(),
            "Pre-sale edit committed"
        );

        Ok(detalle)
    }

    /// Local issue time at the configured offset
    fn issue_time(&self) -> AppResult<NaiveDateTime> {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            AppError::Internal(format!("Invalid UTC offset: {}", self.utc_offset_hours))
        })?;
        Ok(Utc::now().with_timezone(&offset).naive_local())
    }
}

fn document_lines(lineas: &[LineaReconciliada], catalog: &Catalog) -> Vec<LineaComprobante> {
    lineas
        .iter()
        .map(|l| {
            let producto = catalog.productos.get(&l.producto_id);
            LineaComprobante {
                codigo: producto.map(|p| p.codigo.clone()).unwrap_or_default(),
                descripcion: producto.map(|p| p.nombre.clone()).unwrap_or_default(),
                unidad_medida: l.unidad_medida.clone(),
                cantidad: l.cantidad,
                precio_unitario: l.precio_unitario,
                total: l.total,
                tipo_afectacion: l.tipo_afectacion,
            }
        })
        .collect()
}

async fn lock_preventa(conn: &mut PgConnection, preventa_id: Uuid) -> AppResult<Preventa> {
    sqlx::query_as::<_, Preventa>(
        r#"
        SELECT id, cliente_id, almacen_id, usuario_id, estado, estado_sunat,
               metodo_pago, tipo_venta, notas, tipo_comprobante, serie_id,
               numero_comprobante, subtotal, igv, descuento, total,
               base_imponible, valor_venta, xml, nombre_archivo,
               created_at, updated_at
        FROM preventa
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(preventa_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Pre-sale".to_string()))
}

async fn prior_quantities(conn: &mut PgConnection, preventa_id: Uuid) -> AppResult<Vec<OrderedQuantity>> {
    let rows = sqlx::query_as::<_, CantidadRow>(
        r#"
        SELECT producto_id, unidad_medida, cantidad
        FROM detalle_preventa
        WHERE preventa_id = $1
        "#,
    )
    .bind(preventa_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| OrderedQuantity::new(r.producto_id, r.unidad_medida, r.cantidad))
        .collect())
}

async fn load_empresa(conn: &mut PgConnection) -> AppResult<InfoEmpresa> {
    sqlx::query_as::<_, EmpresaRow>(
        r#"
        SELECT ruc, razon_social, nombre_comercial, direccion
        FROM info_empresa
        ORDER BY created_at
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await?
    .map(InfoEmpresa::from)
    .ok_or_else(|| AppError::ReferenceDataMissing("Company".to_string()))
}

async fn load_cliente(conn: &mut PgConnection, cliente_id: Uuid) -> AppResult<Option<ClienteRef>> {
    let row = sqlx::query_as::<_, ClienteRow>(
        r#"
        SELECT id, numero_documento, razon_social, direccion
        FROM cliente
        WHERE id = $1
        "#,
    )
    .bind(cliente_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(ClienteRef::from))
}

async fn load_catalog(conn: &mut PgConnection, product_ids: &[Uuid]) -> AppResult<Catalog> {
    let productos = sqlx::query_as::<_, ProductoRow>(
        r#"
        SELECT id, codigo, nombre, unidad_medida
        FROM producto
        WHERE id = ANY($1)
        "#,
    )
    .bind(product_ids)
    .fetch_all(&mut *conn)
    .await?;

    let precios = sqlx::query_as::<_, PrecioRow>(
        r#"
        SELECT producto_id, unidad_medida, precio
        FROM producto_unidad_medida
        WHERE producto_id = ANY($1)
        "#,
    )
    .bind(product_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut prices = PriceBook::new();
    for producto in &productos {
        prices.insert_product(producto.id, producto.unidad_medida.clone());
    }
    for precio in precios {
        prices.insert_price(precio.producto_id, precio.unidad_medida, precio.precio);
    }

    Ok(Catalog {
        prices,
        productos: productos.into_iter().map(|p| (p.id, p)).collect(),
    })
}

async fn save_totals(
    conn: &mut PgConnection,
    reconciliation: &Reconciliation,
    input: &EditarPreventaInput,
) -> AppResult<()> {
    let totales = &reconciliation.totales;

    sqlx::query(
        r#"
        UPDATE preventa
        SET subtotal = $2, igv = $3, descuento = $4, total = $5,
            base_imponible = $6, valor_venta = $7,
            metodo_pago = $8, tipo_venta = $9, notas = $10,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(reconciliation.preventa_id)
    .bind(totales.subtotal)
    .bind(totales.igv)
    .bind(totales.descuento)
    .bind(totales.total)
    .bind(totales.base_imponible)
    .bind(totales.valor_venta)
    .bind(&input.metodo_pago)
    .bind(&input.tipo_venta)
    .bind(&input.notas)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Replace every line item of the pre-sale with the reconciled set
async fn replace_detalles(conn: &mut PgConnection, reconciliation: &Reconciliation) -> AppResult<()> {
    sqlx::query("DELETE FROM detalle_preventa WHERE preventa_id = $1")
        .bind(reconciliation.preventa_id)
        .execute(&mut *conn)
        .await?;

    for (orden, linea) in reconciliation.lineas.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO detalle_preventa (
                preventa_id, orden, producto_id, unidad_medida, cantidad,
                precio_unitario, total, tipo_afectacion, descuento
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reconciliation.preventa_id)
        .bind(orden as i32)
        .bind(linea.producto_id)
        .bind(&linea.unidad_medida)
        .bind(linea.cantidad)
        .bind(linea.precio_unitario)
        .bind(linea.total)
        .bind(linea.tipo_afectacion.code())
        .bind(linea.descuento)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Replace every bonus item of the pre-sale with the reconciled set
async fn replace_bonificaciones(conn: &mut PgConnection, reconciliation: &Reconciliation) -> AppResult<()> {
    sqlx::query("DELETE FROM bonificacion WHERE preventa_id = $1")
        .bind(reconciliation.preventa_id)
        .execute(&mut *conn)
        .await?;

    for (orden, bonificacion) in reconciliation.bonificaciones.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO bonificacion (preventa_id, orden, producto_id, unidad_medida, cantidad)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(reconciliation.preventa_id)
        .bind(orden as i32)
        .bind(bonificacion.producto_id)
        .bind(&bonificacion.unidad_medida)
        .bind(bonificacion.cantidad)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn load_detalle(conn: &mut PgConnection, preventa_id: Uuid) -> AppResult<PreventaDetalle> {
    let preventa = sqlx::query_as::<_, Preventa>(
        r#"
        SELECT id, cliente_id, almacen_id, usuario_id, estado, estado_sunat,
               metodo_pago, tipo_venta, notas, tipo_comprobante, serie_id,
               numero_comprobante, subtotal, igv, descuento, total,
               base_imponible, valor_venta, xml, nombre_archivo,
               created_at, updated_at
        FROM preventa
        WHERE id = $1
        "#,
    )
    .bind(preventa_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Pre-sale".to_string()))?;

    let cliente = load_cliente(conn, preventa.cliente_id).await?;

    let detalle_preventas = sqlx::query_as::<_, DetallePreventa>(
        r#"
        SELECT d.id, d.preventa_id, d.producto_id,
               p.codigo AS producto_codigo, p.nombre AS producto_nombre,
               d.unidad_medida, d.cantidad, d.precio_unitario, d.total,
               d.tipo_afectacion, d.descuento
        FROM detalle_preventa d
        JOIN producto p ON p.id = d.producto_id
        WHERE d.preventa_id = $1
        ORDER BY d.orden
        "#,
    )
    .bind(preventa_id)
    .fetch_all(&mut *conn)
    .await?;

    let bonificaciones = sqlx::query_as::<_, Bonificacion>(
        r#"
        SELECT b.id, b.preventa_id, b.producto_id, p.nombre AS producto_nombre,
               b.unidad_medida, b.cantidad
        FROM bonificacion b
        JOIN producto p ON p.id = b.producto_id
        WHERE b.preventa_id = $1
        ORDER BY b.orden
        "#,
    )
    .bind(preventa_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(PreventaDetalle {
        preventa,
        cliente,
        detalle_preventas,
        bonificaciones,
    })
}
