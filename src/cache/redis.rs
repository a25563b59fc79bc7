//! Redis cache implementation
//!
//! Shared cache for deployments running more than one instance. Every key is
//! namespaced under a prefix so `clear` and pattern deletes never touch keys
//! owned by other applications on the same Redis database.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Number of keys to scan per iteration in delete_pattern
const SCAN_COUNT: usize = 100;

/// Namespace prepended to every key
const KEY_PREFIX: &str = "quire:";

pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect and verify the server answers a PING
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .context("Redis did not answer PING")?;

        Ok(Self { connection })
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("Failed to scan keys in Redis")?;

            if !keys.is_empty() {
                let _: () = conn
                    .del(&keys)
                    .await
                    .context("Failed to delete keys from Redis")?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn
            .get(Self::namespaced(key))
            .await
            .context("Failed to get value from Redis")?;

        result
            .map(|json| serde_json::from_str(&json).context("Failed to deserialize cached value"))
            .transpose()
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        // SETEX takes whole seconds
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(Self::namespaced(key), json, ttl_secs)
            .await
            .context("Failed to set value in Redis")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(Self::namespaced(key))
            .await
            .context("Failed to delete key from Redis")?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        self.delete_matching(&Self::namespaced(pattern)).await
    }

    async fn clear(&self) -> Result<()> {
        self.delete_matching(&format!("{}*", KEY_PREFIX)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(RedisCache::namespaced("tag:posts"), "quire:tag:posts");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        assert!(RedisCache::connect("redis://127.0.0.1:1").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_set_get_delete_pattern() {
        let cache = RedisCache::connect(&redis_url()).await.unwrap();
        let ttl = Duration::from_secs(60);

        cache.set("test:a", &"one".to_string(), ttl).await.unwrap();
        cache.set("test:b", &"two".to_string(), ttl).await.unwrap();
        let value: Option<String> = cache.get("test:a").await.unwrap();
        assert_eq!(value.as_deref(), Some("one"));

        cache.delete_pattern("test:*").await.unwrap();
        assert_eq!(cache.get::<String>("test:b").await.unwrap(), None);
    }
}
