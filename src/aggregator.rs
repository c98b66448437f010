use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use crate::cache::{cache_key, CacheStore};
use crate::flag::CombinedFlagInfo;
use crate::origin::Origin;
use crate::FlagError;

/// Cache-aside retrieval of [`CombinedFlagInfo`].
///
/// A hit is served from the store. A miss (or an entry that no longer
/// parses) fans out to both origins concurrently and writes the merged
/// result back with `ttl`. Concurrent misses for one flag are not
/// coalesced; each performs its own fan-out and the last write wins.
pub struct Aggregator {
    cache: Arc<dyn CacheStore + Send + Sync>,
    origin: Arc<dyn Origin + Send + Sync>,
    ttl: Duration,
}

impl Aggregator {
    pub fn new(
        cache: Arc<dyn CacheStore + Send + Sync>,
        origin: Arc<dyn Origin + Send + Sync>,
        ttl: Duration,
    ) -> Self {
        Self { cache, origin, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_combined_info(&self, flag_name: &str) -> Result<CombinedFlagInfo, FlagError> {
        let key = cache_key(flag_name);

        if let Some(info) = self.lookup(&key, flag_name).await {
            return Ok(info);
        }

        debug!("Cache miss for flag '{}'", flag_name);
        let info = self.fetch_from_origins(flag_name).await?;
        self.populate(&key, &info).await;
        Ok(info)
    }

    async fn lookup(&self, key: &str, flag_name: &str) -> Option<CombinedFlagInfo> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed for flag '{}': {}", flag_name, e);
                return None;
            }
        };

        match serde_json::from_str::<CombinedFlagInfo>(&raw) {
            Ok(info) => {
                debug!("Cache hit for flag '{}'", flag_name);
                Some(info)
            }
            Err(e) => {
                error!("Failed to deserialize cached info for flag '{}': {}", flag_name, e);
                None
            }
        }
    }

    async fn fetch_from_origins(&self, flag_name: &str) -> Result<CombinedFlagInfo, FlagError> {
        let (flag, rule) = tokio::join!(
            self.origin.fetch_flag(flag_name),
            self.origin.fetch_rule(flag_name),
        );

        let flag = flag.map_err(|e| {
            error!("Flag fetch failed for '{}': {}", flag_name, e);
            e
        })?;
        let rule = match rule {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!("No targeting rule for flag '{}', using flag state: {}", flag_name, e);
                None
            }
        };

        Ok(CombinedFlagInfo::new(flag, rule))
    }

    async fn populate(&self, key: &str, info: &CombinedFlagInfo) {
        let payload = match serde_json::to_string(info) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize info for cache key '{}': {}", key, e);
                return;
            }
        };

        if let Err(e) = self.cache.set(key, payload, self.ttl).await {
            warn!("Cache write failed for key '{}': {}", key, e);
        }
    }
}
