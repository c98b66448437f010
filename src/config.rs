use std::env;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Url;

use crate::FlagError;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-level settings for talking to the origin services.
#[derive(Debug, Clone)]
pub struct Config {
    pub flag_service_url: String,
    pub targeting_service_url: String,
    pub service_api_key: String,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Config {
    /// Reads `FLAG_SERVICE_URL`, `TARGETING_SERVICE_URL` and `SERVICE_API_KEY`
    /// (required) plus `REQUEST_TIMEOUT_SECS` and `CACHE_TTL_SECS` (optional).
    pub fn from_env() -> Result<Self, FlagError> {
        Ok(Self {
            flag_service_url: required("FLAG_SERVICE_URL")?,
            targeting_service_url: required("TARGETING_SERVICE_URL")?,
            service_api_key: required("SERVICE_API_KEY")?,
            request_timeout: seconds("REQUEST_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            cache_ttl: seconds("CACHE_TTL_SECS")?.unwrap_or(DEFAULT_CACHE_TTL),
        })
    }
}

fn required(key: &str) -> Result<String, FlagError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(FlagError::ConfigError(format!("{} must be set", key))),
    }
}

fn seconds(key: &str) -> Result<Option<Duration>, FlagError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| FlagError::ConfigError(format!("{} is not a number of seconds: {:?}", key, value))),
        Err(_) => Ok(None),
    }
}

/// Everything the origin clients share, built once from a [`Config`].
#[derive(Debug, Clone)]
pub struct Context {
    pub(crate) http_client: reqwest::Client,
    pub(crate) flag_service_url: Url,
    pub(crate) targeting_service_url: Url,
}

impl Context {
    pub fn new(config: &Config) -> Result<Self, FlagError> {
        if config.service_api_key.is_empty() {
            return Err(FlagError::ConfigError("Service API key is required".to_string()));
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_api_key))
            .map_err(|_| FlagError::ConfigError("Service API key is not a valid header value".to_string()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Flags-Eval-Rust"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            flag_service_url: parse_base_url("flag service", &config.flag_service_url)?,
            targeting_service_url: parse_base_url("targeting service", &config.targeting_service_url)?,
        })
    }
}

fn parse_base_url(service: &str, raw: &str) -> Result<Url, FlagError> {
    let url = Url::parse(raw)
        .map_err(|e| FlagError::ConfigError(format!("invalid {} URL {:?}: {}", service, raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(FlagError::ConfigError(format!("{} URL {:?} cannot be a base", service, raw)));
    }
    Ok(url)
}
