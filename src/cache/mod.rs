//! Cache layer
//!
//! Two backends sit behind the [`Cache`] enum:
//! - in-memory (moka), the default for single-instance deployments
//! - Redis, for deployments sharing a cache between instances
//!
//! Services use the cache through [`TaggedCache`], which groups keys under
//! tags so a mutation can drop every read path it affects at once.
//!
//! ```rust,ignore
//! use quire::cache::{create_cache, TaggedCache};
//!
//! let cache = create_cache(&config.cache).await;
//! let tagged = TaggedCache::new(cache, config.cache.ttl());
//! ```

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;
pub mod tagged;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;
pub use tagged::{keys, TaggedCache};

/// Cache layer trait
///
/// The methods are generic, so the trait is not object safe; use the
/// [`Cache`] enum for runtime selection.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Get a value from cache
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Set a value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete all values matching a glob pattern
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    /// Clear all cache entries
    async fn clear(&self) -> Result<()>;
}

/// Runtime-selected cache backend
#[derive(Debug)]
pub enum Cache {
    Memory(MemoryCache),
    #[cfg(feature = "redis-cache")]
    Redis(RedisCache),
}

impl Cache {
    /// Name of the active backend, for logs and health output
    pub fn backend_name(&self) -> &'static str {
        match self {
            Cache::Memory(_) => "memory",
            #[cfg(feature = "redis-cache")]
            Cache::Redis(_) => "redis",
        }
    }
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete_pattern(pattern).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete_pattern(pattern).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.clear().await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.clear().await,
        }
    }
}

/// Create the cache backend named by the configuration.
///
/// Redis problems never stop start-up: a missing URL, an unreachable server
/// or a build without the `redis-cache` feature all log a warning and fall
/// back to the in-memory cache.
pub async fn create_cache(config: &CacheConfig) -> Arc<Cache> {
    match config.driver {
        CacheDriver::Memory => {}
        CacheDriver::Redis => {
            #[cfg(feature = "redis-cache")]
            match config.redis_url.as_deref() {
                Some(url) => match RedisCache::connect(url).await {
                    Ok(cache) => {
                        tracing::info!("Using Redis cache");
                        return Arc::new(Cache::Redis(cache));
                    }
                    Err(e) => {
                        tracing::warn!("Redis unavailable, falling back to memory cache: {:#}", e);
                    }
                },
                None => {
                    tracing::warn!("Redis cache selected without a URL, using memory cache");
                }
            }

            #[cfg(not(feature = "redis-cache"))]
            tracing::warn!("Built without the redis-cache feature, using memory cache");
        }
    }

    tracing::info!("Using in-memory cache");
    Arc::new(Cache::Memory(MemoryCache::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_cache() {
        let cache = create_cache(&CacheConfig::default()).await;
        assert_eq!(cache.backend_name(), "memory");

        cache
            .set("test_key", &"test_value".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let result: Option<String> = cache.get("test_key").await.unwrap();
        assert_eq!(result.as_deref(), Some("test_value"));
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_memory() {
        let config = CacheConfig {
            driver: CacheDriver::Redis,
            redis_url: Some("redis://127.0.0.1:1".to_string()),
            ttl_seconds: 60,
        };
        let cache = create_cache(&config).await;
        assert_eq!(cache.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_redis_without_url_falls_back_to_memory() {
        let config = CacheConfig {
            driver: CacheDriver::Redis,
            redis_url: None,
            ttl_seconds: 60,
        };
        assert_eq!(create_cache(&config).await.backend_name(), "memory");
    }
}
