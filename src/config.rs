//! Service configuration from the environment.

use std::time::Duration;
use thiserror::Error;

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_PORT: u16 = 8083;
const DEFAULT_CURRENCY: &str = "NPR";
const DEFAULT_CONFIRMATION_DELAY_MS: u64 = 3000;
const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 1800;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub api_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub currency: String,
    pub confirmation_delay: Duration,
    /// Sessions untouched for this long are dropped by the sweeper.
    pub session_ttl: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            port: DEFAULT_PORT,
            nats_url: None,
            currency: DEFAULT_CURRENCY.to_string(),
            confirmation_delay: Duration::from_millis(DEFAULT_CONFIRMATION_DELAY_MS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_IDLE_TTL_SECS),
        }
    }
}

impl CheckoutConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = var("CHECKOUT_API_URL").or_else(|| var("NEXT_PUBLIC_API_URL")).unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid { name: "CHECKOUT_API_URL", reason: format!("expected an http(s) url, got {api_url:?}") });
        }

        let port = match var("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid { name: "PORT", reason: e.to_string() })?,
            None => DEFAULT_PORT,
        };

        let currency = var("CHECKOUT_CURRENCY").map(|c| c.to_uppercase()).unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid { name: "CHECKOUT_CURRENCY", reason: format!("expected a 3-letter code, got {currency:?}") });
        }

        let delay_ms = match var("CONFIRMATION_DELAY_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid { name: "CONFIRMATION_DELAY_MS", reason: e.to_string() })?,
            None => DEFAULT_CONFIRMATION_DELAY_MS,
        };

        let ttl_secs = match var("SESSION_IDLE_TTL_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => return Err(ConfigError::Invalid { name: "SESSION_IDLE_TTL_SECS", reason: "must be at least 1".to_string() }),
                Ok(secs) => secs,
                Err(e) => return Err(ConfigError::Invalid { name: "SESSION_IDLE_TTL_SECS", reason: e.to_string() }),
            },
            None => DEFAULT_SESSION_IDLE_TTL_SECS,
        };

        Ok(Self {
            api_url,
            port,
            nats_url: var("NATS_URL"),
            currency,
            confirmation_delay: Duration::from_millis(delay_ms),
            session_ttl: Duration::from_secs(ttl_secs),
        })
    }
}
