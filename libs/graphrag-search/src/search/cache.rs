use lru::LruCache;
use tokio::sync::Mutex;

use crate::config::SearchOptions;
use crate::error::SearchError;

use super::base::SearchResult;
use super::router::SearchModeRouter;

/// LRU of finished results keyed by query, mode and options.
pub struct QueryCache {
    entries: Mutex<LruCache<String, SearchResult>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        QueryCache {
            entries: Mutex::new(LruCache::new(capacity.max(1))),
        }
    }

    pub fn key(query: &str, mode: &str, options: &SearchOptions) -> String {
        let options = serde_json::to_string(options).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(query.trim().as_bytes());
        hasher.update(&[0]);
        hasher.update(mode.trim().to_lowercase().as_bytes());
        hasher.update(&[0]);
        hasher.update(options.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub async fn get(&self, key: &str) -> Option<SearchResult> {
        self.entries.lock().await.get(&key.to_string()).cloned()
    }

    pub async fn put(&self, key: String, result: SearchResult) {
        self.entries.lock().await.put(key, result);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// `SearchModeRouter` with a result cache in front. Errors are not cached.
pub struct CachedRouter {
    router: SearchModeRouter,
    cache: QueryCache,
}

impl CachedRouter {
    pub fn new(router: SearchModeRouter, capacity: usize) -> Self {
        CachedRouter {
            router,
            cache: QueryCache::new(capacity),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn route(&self, query: &str, mode: &str, options: &SearchOptions) -> Result<SearchResult, SearchError> {
        let key = QueryCache::key(query, mode, options);
        if let Some(result) = self.cache.get(&key).await {
            tracing::debug!(mode, "Query cache hit");
            return Ok(result);
        }

        let result = self.router.route(query, mode, options).await?;
        self.cache.put(key, result.clone()).await;
        Ok(result)
    }
}
