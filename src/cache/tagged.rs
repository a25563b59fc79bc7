//! Tag-indexed cache
//!
//! Every cached value is recorded under one or more tags. Each tag has an
//! index entry (`tag:<name>`) listing the keys stored under it, and
//! invalidating a tag deletes those keys and the index itself.
//!
//! Cache failures are logged and treated as misses. A broken cache slows
//! requests down but never fails them.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Cache, CacheLayer};

/// Tag names and key builders shared by the services
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const TAGS: &str = "tags";
    pub const NAV: &str = "nav";
    pub const POSTS: &str = "posts";

    /// Tag covering everything derived from one post
    pub fn post(slug: &str) -> String {
        format!("post:{}", slug)
    }

    /// Every tag that a full import or restore must drop
    pub const ALL: &[&str] = &[SETTINGS, TAGS, NAV, POSTS];
}

fn index_key(tag: &str) -> String {
    format!("tag:{}", tag)
}

/// Cache wrapper that maintains the tag index
pub struct TaggedCache {
    inner: Arc<Cache>,
    default_ttl: Duration,
    /// Serialises read-modify-write of index entries within this process
    index_lock: Mutex<()>,
}

impl TaggedCache {
    pub fn new(inner: Arc<Cache>, default_ttl: Duration) -> Self {
        Self {
            inner,
            default_ttl,
            index_lock: Mutex::new(()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn inner(&self) -> &Arc<Cache> {
        &self.inner
    }

    /// Read a value; errors count as a miss
    pub async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        match self.inner.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, "Cache read failed: {:#}", e);
                None
            }
        }
    }

    /// Store a value and record its key under every tag
    pub async fn set_tagged<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) {
        if let Err(e) = self.inner.set(key, value, ttl).await {
            tracing::warn!(key, "Cache write failed: {:#}", e);
            return;
        }

        // The index must outlive the entries it points at
        let index_ttl = ttl.max(self.default_ttl);
        let _guard = self.index_lock.lock().await;
        for tag in tags {
            let index = index_key(tag);
            let mut members: Vec<String> = self.get(&index).await.unwrap_or_default();
            if members.iter().any(|k| k == key) {
                continue;
            }
            members.push(key.to_string());
            if let Err(e) = self.inner.set(&index, &members, index_ttl).await {
                tracing::warn!(tag = *tag, "Cache index write failed: {:#}", e);
            }
        }
    }

    /// Drop every key recorded under `tag`, then the index itself
    pub async fn invalidate_tag(&self, tag: &str) {
        let index = index_key(tag);
        let _guard = self.index_lock.lock().await;
        let members: Vec<String> = self.get(&index).await.unwrap_or_default();
        for key in &members {
            if let Err(e) = self.inner.delete(key).await {
                tracing::warn!(key = key.as_str(), "Cache delete failed: {:#}", e);
            }
        }
        if let Err(e) = self.inner.delete(&index).await {
            tracing::warn!(tag, "Cache index delete failed: {:#}", e);
        }
        tracing::debug!(tag, keys = members.len(), "Invalidated cache tag");
    }

    pub async fn invalidate_tags(&self, tags: &[&str]) {
        for tag in tags {
            self.invalidate_tag(tag).await;
        }
    }

    /// Drop every cached value
    pub async fn clear(&self) {
        if let Err(e) = self.inner.clear().await {
            tracing::warn!("Cache clear failed: {:#}", e);
        }
    }

    /// Read-through: return the cached value or run `loader`, caching its
    /// result under `tags` with the default TTL. Loader errors are returned
    /// unchanged and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, tags: &[&str], loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.set_tagged(key, &value, self.default_ttl, tags).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tagged() -> TaggedCache {
        TaggedCache::new(
            Arc::new(Cache::Memory(MemoryCache::new())),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_invalidate_tag_removes_every_member() {
        let cache = tagged();
        let ttl = Duration::from_secs(60);
        cache.set_tagged("posts:page:1", &1, ttl, &[keys::POSTS]).await;
        cache.set_tagged("posts:page:2", &2, ttl, &[keys::POSTS]).await;
        cache
            .set_tagged("post:hello", &3, ttl, &[keys::POSTS, &keys::post("hello")])
            .await;
        cache.set_tagged("nav:tree", &4, ttl, &[keys::NAV]).await;

        cache.invalidate_tag(keys::POSTS).await;

        assert_eq!(cache.get::<i32>("posts:page:1").await, None);
        assert_eq!(cache.get::<i32>("posts:page:2").await, None);
        assert_eq!(cache.get::<i32>("post:hello").await, None);
        assert_eq!(cache.get::<i32>("nav:tree").await, Some(4));
        assert_eq!(cache.get::<Vec<String>>("tag:posts").await, None);
    }

    #[tokio::test]
    async fn test_index_does_not_duplicate_keys() {
        let cache = tagged();
        let ttl = Duration::from_secs(60);
        cache.set_tagged("settings:all", &1, ttl, &[keys::SETTINGS]).await;
        cache.set_tagged("settings:all", &2, ttl, &[keys::SETTINGS]).await;

        let index: Vec<String> = cache.get("tag:settings").await.unwrap();
        assert_eq!(index, vec!["settings:all".to_string()]);
    }

    #[tokio::test]
    async fn test_get_or_load_caches_until_invalidated() {
        let cache = tagged();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(vec!["a".to_string()])
        };

        let first: Vec<String> = cache.get_or_load("tags:all", &[keys::TAGS], load).await.unwrap();
        let second: Vec<String> = cache.get_or_load("tags:all", &[keys::TAGS], load).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate_tag(keys::TAGS).await;
        let _: Vec<String> = cache.get_or_load("tags:all", &[keys::TAGS], load).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache = tagged();
        let result: Result<i32, &str> = cache
            .get_or_load("k", &[keys::NAV], || async { Err("boom") })
            .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.get::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let cache = tagged();
        cache
            .inner()
            .set("k", &"not a number", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get::<i32>("k").await, None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(30))]

            #[test]
            fn property_invalidation_removes_exactly_tagged_keys(
                tagged_keys in proptest::collection::hash_set("[a-z]{1,6}", 1..8),
                other_keys in proptest::collection::hash_set("[A-Z]{1,6}", 0..8),
            ) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let cache = tagged();
                    let ttl = Duration::from_secs(60);
                    for key in &tagged_keys {
                        cache.set_tagged(key, &1, ttl, &["t"]).await;
                    }
                    for key in &other_keys {
                        cache.set_tagged(key, &2, ttl, &["u"]).await;
                    }

                    cache.invalidate_tag("t").await;

                    for key in &tagged_keys {
                        prop_assert_eq!(cache.get::<i32>(key).await, None);
                    }
                    for key in &other_keys {
                        prop_assert_eq!(cache.get::<i32>(key).await, Some(2));
                    }
                    Ok(())
                })?;
            }
        }
    }
}
