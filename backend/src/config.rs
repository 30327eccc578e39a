//! Configuration management for the pre-sale billing service
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with PREVENTA_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::SeriesDefaults;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Identity provider token configuration
    pub auth: AuthConfig,

    /// Tax document configuration
    pub billing: BillingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared secret the identity provider signs tokens with
    pub jwt_secret: String,

    /// Role assumed when a token carries no role claim
    pub default_role: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Starting series code for invoices (FACTURA)
    pub factura_series: String,

    /// Starting series code for receipts (BOLETA)
    pub boleta_series: String,

    /// ISO currency code written on documents
    pub currency: String,

    /// Offset from UTC used for document issue date and time
    pub utc_offset_hours: i32,

    /// PKCS#12 bundle used to sign documents; unsigned when absent
    pub certificate_path: Option<String>,

    /// Password of the PKCS#12 bundle
    pub certificate_password: Option<String>,
}

impl BillingConfig {
    pub fn series_defaults(&self) -> SeriesDefaults {
        SeriesDefaults {
            factura: self.factura_series.clone(),
            boleta: self.boleta_series.clone(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("PREVENTA_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("auth.default_role", "EMPLEADO")?
            .set_default("billing.factura_series", "F001")?
            .set_default("billing.boleta_series", "B001")?
            .set_default("billing.currency", "PEN")?
            .set_default("billing.utc_offset_hours", -5)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (PREVENTA_ prefix)
            .add_source(
                Environment::with_prefix("PREVENTA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
