// src/lib.rs
use std::sync::Arc;
use std::time::Duration;

use log::error;
use thiserror::Error;

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod evaluator;
pub mod flag;
pub mod origin;
#[cfg(feature = "tower-middleware")]
pub mod middleware;

use crate::aggregator::Aggregator;
use crate::cache::{CacheStore, MemoryStore};
use crate::config::{Config, Context, DEFAULT_CACHE_TTL, DEFAULT_REQUEST_TIMEOUT};
use crate::evaluator::Decision;
use crate::flag::CombinedFlagInfo;
use crate::origin::{HttpOrigin, Origin};

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("Flag or rule '{0}' not found")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected status code {status} from {service}")]
    StatusError { service: &'static str, status: u16 },

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl FlagError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlagError::NotFound(_))
    }

    /// Network failure or an unexpected status from an origin.
    pub fn is_transport(&self) -> bool {
        matches!(self, FlagError::HttpError(_) | FlagError::StatusError { .. })
    }
}

/// A flag name bound to a client, see [`Client::is`].
pub struct FlagCheck<'a> {
    name: String,
    client: &'a Client,
}

impl<'a> FlagCheck<'a> {
    /// Fails closed: if the flag cannot be fetched the result is `false`.
    pub async fn enabled_for(&self, user_id: &str) -> bool {
        match self.client.evaluate(user_id, &self.name).await {
            Ok(enabled) => enabled,
            Err(e) => {
                error!("Failed to evaluate flag '{}': {}", self.name, e);
                false
            }
        }
    }
}

pub struct Client {
    aggregator: Aggregator,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn is(&self, name: &str) -> FlagCheck<'_> {
        FlagCheck {
            name: name.to_string(),
            client: self,
        }
    }

    /// Whether `flag_name` is on for `user_id`. Errors only when the flag
    /// itself could not be obtained.
    pub async fn evaluate(&self, user_id: &str, flag_name: &str) -> Result<bool, FlagError> {
        Ok(self.explain(user_id, flag_name).await?.enabled())
    }

    /// Like [`Client::evaluate`], but reports why.
    pub async fn explain(&self, user_id: &str, flag_name: &str) -> Result<Decision, FlagError> {
        let info = self.aggregator.get_combined_info(flag_name).await?;
        Ok(evaluator::explain(&info, user_id))
    }

    pub async fn combined_info(&self, flag_name: &str) -> Result<CombinedFlagInfo, FlagError> {
        self.aggregator.get_combined_info(flag_name).await
    }

    pub fn cache_ttl(&self) -> Duration {
        self.aggregator.ttl()
    }
}

pub struct ClientBuilder {
    flag_service_url: Option<String>,
    targeting_service_url: Option<String>,
    service_api_key: Option<String>,
    request_timeout: Duration,
    cache_ttl: Duration,
    use_memory_cache: bool,
    #[cfg(feature = "sqlite-cache")]
    file_name: Option<String>,
    cache: Option<Arc<dyn CacheStore + Send + Sync>>,
    origin: Option<Arc<dyn Origin + Send + Sync>>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            flag_service_url: None,
            targeting_service_url: None,
            service_api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            use_memory_cache: false,
            #[cfg(feature = "sqlite-cache")]
            file_name: None,
            cache: None,
            origin: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.flag_service_url = Some(config.flag_service_url);
        self.targeting_service_url = Some(config.targeting_service_url);
        self.service_api_key = Some(config.service_api_key);
        self.request_timeout = config.request_timeout;
        self.cache_ttl = config.cache_ttl;
        self
    }

    pub fn with_flag_service_url(mut self, url: &str) -> Self {
        self.flag_service_url = Some(url.to_string());
        self
    }

    pub fn with_targeting_service_url(mut self, url: &str) -> Self {
        self.targeting_service_url = Some(url.to_string());
        self
    }

    pub fn with_service_api_key(mut self, key: &str) -> Self {
        self.service_api_key = Some(key.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_memory_cache(mut self) -> Self {
        self.use_memory_cache = true;
        self
    }

    #[cfg(feature = "sqlite-cache")]
    pub fn with_sqlite_cache(mut self, file_name: &str) -> Self {
        self.file_name = Some(file_name.to_string());
        self
    }

    /// Use an externally managed store, e.g. one shared with other clients.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore + Send + Sync>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the HTTP origins. The service URLs and key are then unused.
    pub fn with_origin(mut self, origin: Arc<dyn Origin + Send + Sync>) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn build(self) -> Result<Client, FlagError> {
        let cache = self.build_cache()?;

        let origin: Arc<dyn Origin + Send + Sync> = match self.origin {
            Some(origin) => origin,
            None => {
                let config = Config {
                    flag_service_url: self
                        .flag_service_url
                        .ok_or_else(|| FlagError::ConfigError("Flag service URL is required".to_string()))?,
                    targeting_service_url: self
                        .targeting_service_url
                        .ok_or_else(|| FlagError::ConfigError("Targeting service URL is required".to_string()))?,
                    service_api_key: self
                        .service_api_key
                        .ok_or_else(|| FlagError::ConfigError("Service API key is required".to_string()))?,
                    request_timeout: self.request_timeout,
                    cache_ttl: self.cache_ttl,
                };
                let context = Context::new(&config)?;
                Arc::new(HttpOrigin::new(&context))
            }
        };

        Ok(Client {
            aggregator: Aggregator::new(cache, origin, self.cache_ttl),
        })
    }

    fn build_cache(&self) -> Result<Arc<dyn CacheStore + Send + Sync>, FlagError> {
        if let Some(cache) = &self.cache {
            return Ok(cache.clone());
        }
        if self.use_memory_cache {
            return Ok(Arc::new(MemoryStore::new()));
        }

        #[cfg(feature = "sqlite-cache")]
        {
            if let Some(file_name) = &self.file_name {
                let store = cache::SqliteStore::open(file_name)
                    .map_err(|e| FlagError::CacheError(e.to_string()))?;
                return Ok(Arc::new(store));
            }
        }

        Ok(Arc::new(MemoryStore::new()))
    }
}
