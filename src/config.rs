//! Client configuration

use crate::error::{ClientError, Result};
use reqwest::Url;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub const ENV_BASE_URL: &str = "MEMORY_LANE_API_URL";
pub const ENV_TIMEOUT_MS: &str = "MEMORY_LANE_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "MEMORY_LANE_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "MEMORY_LANE_RETRY_DELAY_MS";

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// API root, e.g. `https://api.example.com/api`. Endpoint paths are appended verbatim.
    pub base_url: String,

    /// Hard limit for a single attempt (send + body read).
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Bound for both the generic retry loop and the 401 refresh-replay loop.
    /// Default: 3
    pub max_retries: u32,

    /// Fixed pause between generic retries.
    /// Default: 1 second
    pub retry_delay: Duration,

    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            user_agent: concat!("memory-lane-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with `MEMORY_LANE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_BASE_URL) {
            config.base_url = url;
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            config.request_timeout = Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &ms)?);
        }
        if let Some(n) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = parse_number(ENV_MAX_RETRIES, &n)?;
        }
        if let Some(ms) = lookup(ENV_RETRY_DELAY_MS) {
            config.retry_delay = Duration::from_millis(parse_number(ENV_RETRY_DELAY_MS, &ms)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::Configuration(format!("Invalid base URL {:?}: {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "Base URL must use http or https, got {:?}",
                url.scheme()
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ClientError::Configuration(
                "Request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ClientError::Configuration(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_wire_contract() {
        let config = ApiClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_millis(30_000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = ApiClientConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://memories.example.com/api"),
            (ENV_TIMEOUT_MS, "5000"),
            (ENV_MAX_RETRIES, "1"),
            (ENV_RETRY_DELAY_MS, "250"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://memories.example.com/api");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let err = ApiClientConfig::from_lookup(lookup(&[(ENV_MAX_RETRIES, "lots")])).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));

        let err = ApiClientConfig::from_lookup(lookup(&[(ENV_BASE_URL, "ftp://nope")])).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));

        let err = ApiClientConfig::from_lookup(lookup(&[(ENV_TIMEOUT_MS, "0")])).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }
}
