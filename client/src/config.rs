//! Configuration management for the client.

use std::env;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Origin prefix for every backend's `api_base_url`
    pub base_url: String,
    /// How long a successful GET response is served from cache
    pub cache_ttl: Duration,
    /// Maximum number of cached responses
    pub cache_capacity: u64,
    /// Transport timeout, if any
    pub request_timeout: Option<Duration>,
    /// Backends whose POST/PATCH batches use the bulk extension
    pub bulk_backends: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            cache_ttl: Duration::from_millis(1000),
            cache_capacity: 100,
            request_timeout: None,
            bulk_backends: vec!["/agent-api".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = env::var("TANDEM_BASE_URL").unwrap_or(defaults.base_url);

        let cache_ttl = match env::var("TANDEM_CACHE_TTL_MS") {
            Ok(raw) => Duration::from_millis(parse_number("TANDEM_CACHE_TTL_MS", &raw)?),
            Err(_) => defaults.cache_ttl,
        };

        let cache_capacity = match env::var("TANDEM_CACHE_CAPACITY") {
            Ok(raw) => parse_number("TANDEM_CACHE_CAPACITY", &raw)?,
            Err(_) => defaults.cache_capacity,
        };

        let request_timeout = env::var("TANDEM_REQUEST_TIMEOUT_MS")
            .ok()
            .map(|raw| parse_number("TANDEM_REQUEST_TIMEOUT_MS", &raw).map(Duration::from_millis))
            .transpose()?;

        let bulk_backends = match env::var("TANDEM_BULK_BACKENDS") {
            Ok(raw) => parse_list(&raw),
            Err(_) => defaults.bulk_backends,
        };

        Ok(Self {
            base_url,
            cache_ttl,
            cache_capacity,
            request_timeout,
            bulk_backends,
        })
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_bulk_backends(mut self, backends: Vec<String>) -> Self {
        self.bulk_backends = backends;
        self
    }
}

fn parse_number(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_string(),
    })
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(1));
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.bulk_backends, vec!["/agent-api".to_string()]);
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number("X", " 250 "), Ok(250));
        assert_eq!(
            parse_number("TANDEM_CACHE_CAPACITY", "lots"),
            Err(ConfigError::InvalidNumber {
                var: "TANDEM_CACHE_CAPACITY",
                value: "lots".into()
            })
        );
    }

    #[test]
    fn list_parsing() {
        assert_eq!(
            parse_list("/agent-api, /collection-api,,"),
            vec!["/agent-api".to_string(), "/collection-api".to_string()]
        );
        assert!(parse_list("").is_empty());
    }
}
