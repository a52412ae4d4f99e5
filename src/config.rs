//! Configuration management for the ticketing pipeline.
//!
//! Loads configuration from environment variables (and `.env` via `dotenvy`
//! in `main`) with defaults suitable for local development.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid decimal: {value}")]
    InvalidDecimal { name: &'static str, value: String },

    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("PAYOUT_GRACE_DAYS must be a non-negative number of days, got {0}")]
    InvalidGraceDays(i64),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub payments: PaymentsConfig,
    pub settlement: SettlementConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub storage: StorageBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// In-process store; state is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Connection acquire timeout in seconds
    pub connect_timeout: u64,
}

/// Payment provider stand-in configuration.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Shared HMAC secret for webhook signatures
    pub webhook_secret: String,
    pub sandbox_redirect_base: String,
    pub default_currency: String,
    /// Mounts `POST /payments/sandbox/complete`. Off unless set.
    pub sandbox_enabled: bool,
}

/// Settlement scheduler configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub interval: Duration,
    pub commission_rate: BigDecimal,
    pub vat_rate: BigDecimal,
    /// Days after an event's last session before a payout plan is created
    pub grace_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            webhook_secret: "sandbox-secret".to_string(),
            sandbox_redirect_base: "https://sandbox.payments.local/redirect".to_string(),
            default_currency: "TRY".to_string(),
            sandbox_enabled: false,
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            commission_rate: BigDecimal::new(25.into(), 2),
            vat_rate: BigDecimal::new(20.into(), 2),
            grace_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a rate is not a decimal, the grace period is out of
    /// range or the storage backend is unknown.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settlement_defaults = SettlementConfig::default();
        let payments_defaults = PaymentsConfig::default();

        Ok(Self {
            server: ServerConfig {
                bind_addr: env::var("APP_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
                storage: env::var("STORAGE_BACKEND")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(StorageBackend::Postgres))?,
            },
            database: DatabaseConfig {
                url: crate::db::pool_from_env(),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
                connect_timeout: parse_or("DATABASE_CONNECT_TIMEOUT", 30),
            },
            payments: PaymentsConfig {
                webhook_secret: env::var("PAYMENTS_WEBHOOK_SECRET")
                    .unwrap_or(payments_defaults.webhook_secret),
                sandbox_redirect_base: env::var("PAYMENTS_SANDBOX_REDIRECT_BASE")
                    .unwrap_or(payments_defaults.sandbox_redirect_base),
                default_currency: env::var("PAYMENTS_DEFAULT_CURRENCY")
                    .unwrap_or(payments_defaults.default_currency),
                sandbox_enabled: parse_or("PAYMENTS_SANDBOX_ENABLED", false),
            },
            settlement: SettlementConfig {
                interval: Duration::from_secs(parse_or("PAYOUT_INTERVAL_SECS", 10).max(1)),
                commission_rate: decimal_or(
                    "PAYOUT_COMMISSION_RATE",
                    settlement_defaults.commission_rate,
                )?,
                vat_rate: decimal_or("PAYOUT_VAT_RATE", settlement_defaults.vat_rate)?,
                grace_days: grace_days(parse_or("PAYOUT_GRACE_DAYS", settlement_defaults.grace_days))?,
            },
            log: LogConfig {
                format: match env::var("LOG_FORMAT").as_deref() {
                    Ok("json") => LogFormat::Json,
                    _ => LogFormat::Plain,
                },
            },
        })
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Accepts only grace periods that `chrono` can represent as a duration.
fn grace_days(days: i64) -> Result<i64, ConfigError> {
    match chrono::TimeDelta::try_days(days) {
        Some(_) if days >= 0 => Ok(days),
        _ => Err(ConfigError::InvalidGraceDays(days)),
    }
}

fn decimal_or(name: &'static str, default: BigDecimal) -> Result<BigDecimal, ConfigError> {
    match env::var(name) {
        Ok(value) => BigDecimal::from_str(value.trim())
            .map_err(|_| ConfigError::InvalidDecimal { name, value }),
        Err(_) => Ok(default),
    }
}
