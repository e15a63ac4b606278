//! TTL cache in front of a [`WeatherProvider`].
//!
//! Reports are keyed by [`location_key`](crate::location_key). Concurrent
//! lookups for the same key while a fetch is in flight share that fetch, so
//! one broadcast run issues at most one provider call per location.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::config::WeatherConfig;
use crate::error::Result;
use crate::provider::WeatherProvider;
use crate::types::WeatherReport;

/// Wraps a provider with an in-memory TTL cache.
pub struct CachedProvider<P> {
    inner: Arc<P>,
    cache: Option<Cache<String, WeatherReport>>,
}

impl<P: WeatherProvider + 'static> CachedProvider<P> {
    /// Build a cache sized and timed from `config`.
    ///
    /// A `cache_ttl_seconds` of 0 disables caching entirely.
    pub fn new(inner: P, config: &WeatherConfig) -> Self {
        Self::with_ttl(
            inner,
            Duration::from_secs(config.cache_ttl_seconds),
            config.cache_capacity,
        )
    }

    /// Build a cache with an explicit TTL and capacity.
    pub fn with_ttl(inner: P, ttl: Duration, capacity: u64) -> Self {
        let cache = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(capacity.max(1))
                .time_to_live(ttl)
                .build()
        });
        Self {
            inner: Arc::new(inner),
            cache,
        }
    }

    /// Drop every cached report.
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}

#[async_trait]
impl<P: WeatherProvider + 'static> WeatherProvider for CachedProvider<P> {
    async fn fetch(&self, location: &str) -> Result<WeatherReport> {
        let Some(cache) = &self.cache else {
            return self.inner.fetch(location).await;
        };

        let key = crate::location_key(location);
        let inner = Arc::clone(&self.inner);
        let owned = location.to_owned();
        cache
            .try_get_with(key, async move { inner.fetch(&owned).await })
            .await
            .map_err(|err| (*err).clone())
    }
}
