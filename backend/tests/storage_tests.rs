//! Storage tests against PostgreSQL
//!
//! Cover the rules that only hold inside the database:
//! - Property 3: Concurrent allocations hand out unique, contiguous correlatives
//! - Property 6: Editing a locked pre-sale leaves every row unchanged
//! - A failure late in the edit rolls back totals, lines and stock together
//!
//! These tests require the `test-postgres` feature. They support two modes:
//! - External database: set PREVENTA_TEST_DATABASE_URL
//! - Local mode: uses testcontainers to start PostgreSQL (requires docker)
//!
//! Every test migrates its own schema, so they can share one database.

#![cfg(feature = "test-postgres")]

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use preventa_backend::config::BillingConfig;
use preventa_backend::error::AppError;
use preventa_backend::middleware::AuthUser;
use preventa_backend::services::series::allocate_in;
use preventa_backend::services::{CertificateBundle, PreventaService, SeriesService};
use rust_decimal::Decimal;
use serde_json::json;
use shared::{DocumentClass, EditarPreventaInput, SeriesDefaults};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

const CERT_PASSWORD: &str = "clave-segura";

/// Pool bound to a fresh schema, plus the container when running locally.
/// The container must be kept alive for the duration of the test.
struct Database {
    pool: PgPool,
    _container: Option<ContainerAsync<Postgres>>,
}

async fn setup_database() -> Database {
    let (url, container) = match std::env::var("PREVENTA_TEST_DATABASE_URL") {
        Ok(url) => (url, None),
        Err(_) => {
            let container = Postgres::default().with_tag("16-alpine").start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
            (url, Some(container))
        }
    };

    let schema = format!("preventa_test_{}", Uuid::new_v4().simple());
    let admin = PgPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .unwrap();
    admin.close().await;

    let options = PgConnectOptions::from_str(&url)
        .unwrap()
        .options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(25)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    Database {
        pool,
        _container: container,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn billing() -> BillingConfig {
    BillingConfig {
        factura_series: "F001".to_string(),
        boleta_series: "B001".to_string(),
        currency: "PEN".to_string(),
        utc_offset_hours: -5,
        certificate_path: None,
        certificate_password: None,
    }
}

fn user(almacen_id: Uuid) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: "vendedor@andina.pe".to_string(),
        role: "EMPLEADO".to_string(),
        almacen_id: Some(almacen_id),
    }
}

fn certificate() -> Arc<CertificateBundle> {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "DISTRIBUIDORA ANDINA SAC").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let der = Pkcs12::builder()
        .name("andina")
        .pkey(&key)
        .cert(&cert)
        .build2(CERT_PASSWORD)
        .unwrap()
        .to_der()
        .unwrap();

    Arc::new(CertificateBundle::open(&der, CERT_PASSWORD).unwrap())
}

/// A pending pre-sale for a RUC client: 3 NIU of one product at 10.00,
/// with 50 NIU and 5 BX in the warehouse
struct Fixture {
    preventa_id: Uuid,
    producto_id: Uuid,
    almacen_id: Uuid,
}

async fn seed(pool: &PgPool) -> Fixture {
    let almacen_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO info_empresa (ruc, razon_social, nombre_comercial, direccion)
         VALUES ('20123456789', 'Distribuidora Andina S.A.C.', 'Andina', 'Av. Los Incas 123, Lima')",
    )
    .execute(pool)
    .await
    .unwrap();

    let cliente_id: Uuid = sqlx::query_scalar(
        "INSERT INTO cliente (numero_documento, razon_social, direccion)
         VALUES ('20987654321', 'Bodega Doña Rosa', 'Jr. Puno 456') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let producto_id: Uuid = sqlx::query_scalar(
        "INSERT INTO producto (codigo, nombre, unidad_medida)
         VALUES ('GAL-001', 'Galletas de vainilla', 'NIU') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    for (unidad, precio, stock) in [("NIU", "10.00", "50"), ("BX", "100.00", "5")] {
        sqlx::query(
            "INSERT INTO producto_unidad_medida (producto_id, unidad_medida, precio) VALUES ($1, $2, $3)",
        )
        .bind(producto_id)
        .bind(unidad)
        .bind(dec(precio))
        .execute(pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO producto_almacen_unidad_medida (producto_id, almacen_id, unidad_medida, stock)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(producto_id)
        .bind(almacen_id)
        .bind(unidad)
        .bind(dec(stock))
        .execute(pool)
        .await
        .unwrap();
    }

    let preventa_id: Uuid = sqlx::query_scalar(
        "INSERT INTO preventa (cliente_id, almacen_id, usuario_id, metodo_pago, tipo_venta,
                               subtotal, igv, total, base_imponible, valor_venta)
         VALUES ($1, $2, $3, 'EFECTIVO', 'CONTADO', 30, 5.4, 35.4, 30, 30) RETURNING id",
    )
    .bind(cliente_id)
    .bind(almacen_id)
    .bind(Uuid::new_v4())
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO detalle_preventa (preventa_id, orden, producto_id, unidad_medida, cantidad,
                                       precio_unitario, total, tipo_afectacion)
         VALUES ($1, 0, $2, 'NIU', 3, 10, 30, '10')",
    )
    .bind(preventa_id)
    .bind(producto_id)
    .execute(pool)
    .await
    .unwrap();

    Fixture {
        preventa_id,
        producto_id,
        almacen_id,
    }
}

fn edit(fixture: &Fixture, unidad: &str, cantidad: i64) -> EditarPreventaInput {
    serde_json::from_value(json!({
        "preventaId": fixture.preventa_id,
        "productos": [
            { "id": fixture.producto_id, "cantidad": cantidad, "unidadSeleccionada": unidad, "tieneIGV": true }
        ],
        "bonificaciones": [],
        "metodoPago": "EFECTIVO",
        "tipoVenta": "CONTADO",
        "notas": null
    }))
    .unwrap()
}

async fn stock(pool: &PgPool, fixture: &Fixture, unidad: &str) -> Decimal {
    sqlx::query_scalar(
        "SELECT stock FROM producto_almacen_unidad_medida
         WHERE producto_id = $1 AND almacen_id = $2 AND unidad_medida = $3",
    )
    .bind(fixture.producto_id)
    .bind(fixture.almacen_id)
    .bind(unidad)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Everything an edit may write, read back for comparison
#[derive(Debug, PartialEq)]
struct Snapshot {
    totals: (Decimal, Decimal, Decimal),
    numero: Option<String>,
    xml: Option<String>,
    lines: Vec<(String, Decimal, Decimal)>,
    stock: (Decimal, Decimal),
    series: i64,
}

async fn snapshot(pool: &PgPool, fixture: &Fixture) -> Snapshot {
    let totals: (Decimal, Decimal, Decimal) =
        sqlx::query_as("SELECT subtotal, igv, total FROM preventa WHERE id = $1")
            .bind(fixture.preventa_id)
            .fetch_one(pool)
            .await
            .unwrap();
    let (numero, xml): (Option<String>, Option<String>) =
        sqlx::query_as("SELECT numero_comprobante, xml FROM preventa WHERE id = $1")
            .bind(fixture.preventa_id)
            .fetch_one(pool)
            .await
            .unwrap();
    let lines: Vec<(String, Decimal, Decimal)> = sqlx::query_as(
        "SELECT unidad_medida, cantidad, total FROM detalle_preventa WHERE preventa_id = $1 ORDER BY orden",
    )
    .bind(fixture.preventa_id)
    .fetch_all(pool)
    .await
    .unwrap();
    let series: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM serie_documento")
        .fetch_one(pool)
        .await
        .unwrap();

    Snapshot {
        totals,
        numero,
        xml,
        lines,
        stock: (stock(pool, fixture, "NIU").await, stock(pool, fixture, "BX").await),
        series,
    }
}

// ============================================================================
// Series allocation
// ============================================================================

/// Property 3: concurrent allocations never share a correlative
#[tokio::test]
async fn test_concurrent_allocations_are_unique_and_contiguous() {
    let db = setup_database().await;
    let service = SeriesService::new(db.pool.clone(), SeriesDefaults::default());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.allocate("01").await.unwrap() })
        })
        .collect();

    let mut allocated = Vec::new();
    for handle in handles {
        allocated.push(handle.await.unwrap());
    }

    let numeros: HashSet<&str> = allocated.iter().map(|a| a.numero.as_str()).collect();
    assert_eq!(numeros.len(), 20);

    let mut correlativos: Vec<i64> = allocated.iter().map(|a| a.correlativo).collect();
    correlativos.sort();
    assert_eq!(correlativos, (1..=20).collect::<Vec<_>>());
    assert!(allocated.iter().all(|a| a.serie == "F001"));

    let stored: i64 = sqlx::query_scalar("SELECT correlativo FROM serie_documento WHERE clase = 'FACTURA'")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(stored, 20);
}

/// Scenario: the first two FACTURA allocations, then BOLETA starts its own series
#[tokio::test]
async fn test_allocation_creates_series_on_first_use() {
    let db = setup_database().await;
    let defaults = SeriesDefaults::default();

    let mut tx = db.pool.begin().await.unwrap();
    let first = allocate_in(&mut *tx, DocumentClass::Factura, &defaults).await.unwrap();
    let second = allocate_in(&mut *tx, DocumentClass::Factura, &defaults).await.unwrap();
    let boleta = allocate_in(&mut *tx, DocumentClass::Boleta, &defaults).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(first.numero, "F001-00000001");
    assert_eq!(second.numero, "F001-00000002");
    assert_eq!(first.serie_id, second.serie_id);
    assert_eq!(boleta.numero, "B001-00000001");
}

/// An allocation inside a rolled back transaction is given out again
#[tokio::test]
async fn test_rolled_back_allocation_is_not_consumed() {
    let db = setup_database().await;
    let defaults = SeriesDefaults::default();

    let mut tx = db.pool.begin().await.unwrap();
    allocate_in(&mut *tx, DocumentClass::Boleta, &defaults).await.unwrap();
    tx.rollback().await.unwrap();

    let service = SeriesService::new(db.pool.clone(), defaults);
    assert_eq!(service.allocate("03").await.unwrap().numero, "B001-00000001");
}

// ============================================================================
// Pre-sale edits
// ============================================================================

/// Scenario: 3 -> 5 units reprices the pre-sale, takes 2 from stock of 50,
/// numbers it and stores the signed document
#[tokio::test]
async fn test_edit_commits_totals_stock_number_and_document() {
    let db = setup_database().await;
    let fixture = seed(&db.pool).await;
    let service = PreventaService::new(db.pool.clone(), &billing(), Some(certificate()));

    let detalle = service
        .update(&user(fixture.almacen_id), fixture.preventa_id, edit(&fixture, "NIU", 5))
        .await
        .unwrap();

    assert_eq!(detalle.preventa.subtotal, dec("50"));
    assert_eq!(detalle.preventa.igv, dec("9"));
    assert_eq!(detalle.preventa.total, dec("59"));
    assert_eq!(detalle.detalle_preventas.len(), 1);
    assert_eq!(detalle.detalle_preventas[0].cantidad, dec("5"));
    assert_eq!(detalle.preventa.numero_comprobante.as_deref(), Some("F001-00000001"));
    assert_eq!(detalle.preventa.tipo_comprobante.as_deref(), Some("01"));

    let xml = detalle.preventa.xml.as_deref().unwrap();
    assert!(xml.contains("<cbc:ID>F001-00000001</cbc:ID>"));
    assert!(xml.contains("<ds:SignatureValue>"));
    assert!(detalle
        .preventa
        .nombre_archivo
        .as_deref()
        .unwrap()
        .starts_with("20123456789-01-F001-00000001-"));

    assert_eq!(stock(&db.pool, &fixture, "NIU").await, dec("48"));
    assert_eq!(stock(&db.pool, &fixture, "BX").await, dec("5"));
}

/// A second edit keeps the number it was given
#[tokio::test]
async fn test_second_edit_reuses_document_number() {
    let db = setup_database().await;
    let fixture = seed(&db.pool).await;
    let service = PreventaService::new(db.pool.clone(), &billing(), None);
    let user = user(fixture.almacen_id);

    service.update(&user, fixture.preventa_id, edit(&fixture, "NIU", 5)).await.unwrap();
    let detalle = service
        .update(&user, fixture.preventa_id, edit(&fixture, "NIU", 3))
        .await
        .unwrap();

    assert_eq!(detalle.preventa.numero_comprobante.as_deref(), Some("F001-00000001"));
    assert_eq!(stock(&db.pool, &fixture, "NIU").await, dec("50"));
}

/// Moving a line from NIU to BX gives the NIU units back
#[tokio::test]
async fn test_unit_change_restores_previous_cell() {
    let db = setup_database().await;
    let fixture = seed(&db.pool).await;
    let service = PreventaService::new(db.pool.clone(), &billing(), None);

    service
        .update(&user(fixture.almacen_id), fixture.preventa_id, edit(&fixture, "BX", 1))
        .await
        .unwrap();

    assert_eq!(stock(&db.pool, &fixture, "NIU").await, dec("53"));
    assert_eq!(stock(&db.pool, &fixture, "BX").await, dec("4"));
}

/// Property 6: a locked pre-sale rejects the edit and nothing moves
#[tokio::test]
async fn test_locked_pre_sale_is_left_unchanged() {
    let db = setup_database().await;
    let fixture = seed(&db.pool).await;
    sqlx::query("UPDATE preventa SET estado = 'completado' WHERE id = $1")
        .bind(fixture.preventa_id)
        .execute(&db.pool)
        .await
        .unwrap();

    let before = snapshot(&db.pool, &fixture).await;
    let service = PreventaService::new(db.pool.clone(), &billing(), Some(certificate()));
    let err = service
        .update(&user(fixture.almacen_id), fixture.preventa_id, edit(&fixture, "NIU", 5))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::EditNotAllowed(_)));
    assert_eq!(snapshot(&db.pool, &fixture).await, before);
}

/// A failure after lines, totals and stock were written rolls all of them back
#[tokio::test]
async fn test_late_failure_rolls_back_the_whole_edit() {
    let db = setup_database().await;
    let fixture = seed(&db.pool).await;
    // Unknown document class: fails when numbering, after the stock pass
    sqlx::query("UPDATE preventa SET tipo_comprobante = '99' WHERE id = $1")
        .bind(fixture.preventa_id)
        .execute(&db.pool)
        .await
        .unwrap();

    let before = snapshot(&db.pool, &fixture).await;
    let service = PreventaService::new(db.pool.clone(), &billing(), Some(certificate()));
    let err = service
        .update(&user(fixture.almacen_id), fixture.preventa_id, edit(&fixture, "NIU", 5))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "tipoComprobante"));
    assert_eq!(snapshot(&db.pool, &fixture).await, before);
    assert_eq!(before.stock.0, dec("50"));
    assert_eq!(before.lines[0].1, dec("3"));
}

/// An edit on a pre-sale that does not exist reports not found
#[tokio::test]
async fn test_missing_pre_sale_is_not_found() {
    let db = setup_database().await;
    let fixture = seed(&db.pool).await;
    let service = PreventaService::new(db.pool.clone(), &billing(), None);
    let ghost = Fixture {
        preventa_id: Uuid::new_v4(),
        producto_id: fixture.producto_id,
        almacen_id: fixture.almacen_id,
    };

    let err = service
        .update(&user(ghost.almacen_id), ghost.preventa_id, edit(&ghost, "NIU", 1))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}
