//! Document series allocation
//!
//! Hands out `{series}-{correlative}` numbers. The increment is a single
//! `UPDATE ... RETURNING` so two allocators can never read the same
//! correlative; the row lock it takes is held until the surrounding
//! transaction commits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{AllocatedNumber, DocumentClass, SeriesDefaults};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Series service for allocating document numbers
#[derive(Clone)]
pub struct SeriesService {
    db: PgPool,
    defaults: SeriesDefaults,
}

/// Document series row
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SerieDocumento {
    pub id: Uuid,
    pub clase: String,
    pub serie: String,
    pub correlativo: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct IncrementRow {
    id: Uuid,
    serie: String,
    correlativo: i64,
}

impl SeriesService {
    /// Create a new SeriesService instance
    pub fn new(db: PgPool, defaults: SeriesDefaults) -> Self {
        Self { db, defaults }
    }

    /// Allocate the next number for a two-character document class code
    /// in its own transaction
    pub async fn allocate(&self, class_code: &str) -> AppResult<AllocatedNumber> {
        let class = parse_class(class_code)?;

        let mut tx = self.db.begin().await?;
        let allocated = allocate_in(&mut *tx, class, &self.defaults).await?;
        tx.commit().await?;

        Ok(allocated)
    }

    /// List all document series
    pub async fn list(&self) -> AppResult<Vec<SerieDocumento>> {
        let series = sqlx::query_as::<_, SerieDocumento>(
            r#"
            SELECT id, clase, serie, correlativo, updated_at
            FROM serie_documento
            ORDER BY clase
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(series)
    }
}

/// Map a document-class code, rejecting unknown codes
pub fn parse_class(class_code: &str) -> AppResult<DocumentClass> {
    DocumentClass::from_code(class_code).ok_or_else(|| AppError::Validation {
        field: "tipoComprobante".to_string(),
        message: format!("Unknown document class code: {}", class_code),
        message_es: format!("Tipo de comprobante desconocido: {}", class_code),
    })
}

/// Allocate the next number inside an open transaction.
///
/// Creates the series row with the configured starting code and
/// correlative zero when it does not exist yet. Nothing is returned unless
/// the increment was written; a failed write surfaces as a storage error.
pub async fn allocate_in(
    conn: &mut PgConnection,
    class: DocumentClass,
    defaults: &SeriesDefaults,
) -> AppResult<AllocatedNumber> {
    sqlx::query(
        r#"
        INSERT INTO serie_documento (clase, serie, correlativo)
        VALUES ($1, $2, 0)
        ON CONFLICT (clase) DO NOTHING
        "#,
    )
    .bind(class.as_str())
    .bind(defaults.series_for(class))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, IncrementRow>(
        r#"
        UPDATE serie_documento
        SET correlativo = correlativo + 1, updated_at = NOW()
        WHERE clase = $1
        RETURNING id, serie, correlativo
        "#,
    )
    .bind(class.as_str())
    .fetch_one(&mut *conn)
    .await?;

    let allocated = AllocatedNumber::new(row.id, row.serie, row.correlativo);

    tracing::info!(
        clase = class.as_str(),
        numero = %allocated.numero,
        "Allocated document number"
    );

    Ok(allocated)
}
