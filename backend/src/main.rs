//! Pre-sale Billing Server

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use preventa_backend::services::CertificateBundle;
use preventa_backend::{create_app, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing, JSON lines in production
    let json = config.environment == "production";
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "preventa_server=debug,preventa_backend=debug,tower_http=debug,sqlx=warn".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting Pre-sale Billing Server");
    tracing::info!("Environment: {}", config.environment);

    // Open the signing bundle now so bad credentials stop startup
    let certificate = match config.billing.certificate_path.as_deref() {
        Some(path) => {
            let password = config.billing.certificate_password.as_deref().unwrap_or_default();
            let bundle = CertificateBundle::load(path, password)
                .with_context(|| format!("opening certificate bundle {}", path))?;
            tracing::info!("Documents will be signed with {}", path);
            Some(Arc::new(bundle))
        }
        None => {
            tracing::warn!("No certificate configured, documents will be stored unsigned");
            None
        }
    };

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    // Create application state
    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        certificate,
    };

    // Build application
    let app = create_app(state);

    // Start server
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server host {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
