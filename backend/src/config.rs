//! Configuration management for the book ledger backend
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with BKL_ prefix

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::ledger::OversellPolicy;
use shared::rates::RateDefaults;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Store backend
    pub storage: StorageBackend,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Payment provider webhook configuration
    pub webhook: WebhookConfig,

    pub stock: StockConfig,

    pub settlement: SettlementConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
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
pub struct JwtConfig {
    /// Secret key used to verify bearer tokens
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Shared secret for HMAC-SHA256 body signatures
    pub secret: String,

    /// Header carrying the hex signature
    pub signature_header: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StockConfig {
    pub oversell_policy: OversellPolicy,

    /// Cap on rows returned by the movements projection
    pub movements_limit: i64,

    /// Trailing window, in days, for the rotation rate
    pub rotation_window_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    pub default_royalty_rate: Decimal,
    pub default_rebate_rate: Decimal,
}

impl SettlementConfig {
    pub fn rate_defaults(&self) -> RateDefaults {
        RateDefaults {
            royalty: self.default_royalty_rate,
            rebate: self.default_rebate_rate,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("BKL_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("storage", "postgres")?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/book_ledger")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("jwt.secret", "development-secret-key")?
            .set_default("webhook.secret", "development-webhook-secret")?
            .set_default("webhook.signature_header", "x-signature")?
            .set_default("stock.oversell_policy", "clamp")?
            .set_default("stock.movements_limit", 500)?
            .set_default("stock.rotation_window_days", 30)?
            .set_default("settlement.default_royalty_rate", "10")?
            .set_default("settlement.default_rebate_rate", "5")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (BKL_ prefix)
            .add_source(
                Environment::with_prefix("BKL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Configuration for tests and local runs against the in-memory store
    pub fn for_memory_store() -> Self {
        Self {
            environment: "test".to_string(),
            storage: StorageBackend::Memory,
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 0,
            },
            jwt: JwtConfig {
                secret: "test-jwt-secret".to_string(),
            },
            webhook: WebhookConfig {
                secret: "test-webhook-secret".to_string(),
                signature_header: "x-signature".to_string(),
            },
            stock: StockConfig {
                oversell_policy: OversellPolicy::Clamp,
                movements_limit: 500,
                rotation_window_days: 30,
            },
            settlement: SettlementConfig {
                default_royalty_rate: Decimal::from(10),
                default_rebate_rate: Decimal::from(5),
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
