use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const BASE_URL_ENV: &str = "CHAINLAB_API_URL";
pub const TIMEOUT_ENV: &str = "CHAINLAB_TIMEOUT_SECS";

const DEFAULT_RETRY_MAX_ELAPSED_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    /// `None` leaves request latency to the transport's own defaults.
    pub timeout: Option<Duration>,
    /// Upper bound on time spent retrying reads.
    pub retry_max_elapsed: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: None,
            retry_max_elapsed: Duration::from_secs(DEFAULT_RETRY_MAX_ELAPSED_SECS),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },
    #[error("Invalid base URL {0:?}")]
    InvalidUrl(String),
}

impl ApiConfig {
    /// Settings map first, environment second, defaults last.
    /// Recognized keys: `base_url`, `timeout_secs`, `retry_max_elapsed_secs`.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str, env: Option<&str>| -> Option<String> {
            settings
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| env.and_then(|e| std::env::var(e).ok()).filter(|v| !v.trim().is_empty()))
        };

        let base_url = lookup("base_url", Some(BASE_URL_ENV))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        reqwest::Url::parse(&base_url).map_err(|_| ConfigError::InvalidUrl(base_url.clone()))?;

        let timeout = lookup("timeout_secs", Some(TIMEOUT_ENV))
            .map(|v| parse_secs("timeout_secs", &v))
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let retry_max_elapsed = lookup("retry_max_elapsed_secs", None)
            .map(|v| parse_secs("retry_max_elapsed_secs", &v))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_RETRY_MAX_ELAPSED_SECS));

        Ok(Self { base_url, timeout, retry_max_elapsed })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_settings(&HashMap::new())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}
