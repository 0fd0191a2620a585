use crate::error::{AppError, Result};
use crate::suppression::PriceBasis;

/// Default suppression window after a deletion (seconds).
pub const SUPPRESSION_WINDOW_SECS: u64 = 24 * 60 * 60;

/// How often expired suppression entries are purged (seconds).
pub const PURGE_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// SSE heartbeat interval (seconds). Dead connections surface as write failures on the next ping.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Events buffered per subscriber before the oldest is dropped.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Compare-and-swap attempts per suppression key before giving up.
pub const CAS_RETRY_BUDGET: u32 = 8;

/// Upper bound on rows returned by the deal listing.
pub const DEALS_LIST_LIMIT: i64 = 500;

/// Max pooled SQLite connections.
pub const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be 'sqlite' or 'memory', got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// CORS origin for the dashboard (ALLOW_ORIGIN). "*" allows any origin.
    pub allow_origin: String,
    /// Shared secret for mutating routes (API_KEY). None disables the guard.
    pub api_key: Option<String>,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub db_path: String,
    pub price_basis: PriceBasis,
    pub suppression_window_secs: u64,
    pub purge_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub subscriber_queue_capacity: usize,
    pub deals_list_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("PORT must be a valid port number".to_string()))?,
            allow_origin: std::env::var("ALLOW_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_key: std::env::var("API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            store_backend: std::env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "sqlite".to_string())
                .parse()?,
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "deals.db".to_string()),
            price_basis: std::env::var("PRICE_BASIS")
                .unwrap_or_else(|_| "buff".to_string())
                .parse()?,
            suppression_window_secs: env_or("SUPPRESSION_WINDOW_SECS", SUPPRESSION_WINDOW_SECS),
            purge_interval_secs: env_or("PURGE_INTERVAL_SECS", PURGE_INTERVAL_SECS),
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", HEARTBEAT_INTERVAL_SECS),
            subscriber_queue_capacity: env_or("SUBSCRIBER_QUEUE_CAPACITY", SUBSCRIBER_QUEUE_CAPACITY)
                .max(1),
            deals_list_limit: env_or("DEALS_LIST_LIMIT", DEALS_LIST_LIMIT).max(1),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn suppression_window_ms(&self) -> i64 {
        (self.suppression_window_secs as i64).saturating_mul(1_000)
    }
}

/// Parse an optional numeric env var, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
