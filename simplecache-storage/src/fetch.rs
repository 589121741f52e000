//! HTTP GET with the response body cached.
//!
//! The HTTP client itself is a collaborator behind [`HttpFetcher`]; this
//! module only decides when to ask it and what to keep.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simplecache_core::CacheResult;

use crate::cache::{SetOptions, SimpleCache};

/// How long a successful body stays cached.
pub const DEFAULT_URL_EXPIRATION: Duration = Duration::from_secs(2 * 3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs the actual GET request.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CacheResult<HttpResponse>;
}

/// Cache-first URL loader.
#[derive(Debug, Clone)]
pub struct CachedFetcher<F> {
    fetcher: F,
    cache: SimpleCache,
    namespace: String,
    expiration: Duration,
}

impl<F: HttpFetcher> CachedFetcher<F> {
    pub fn new(fetcher: F, cache: SimpleCache, namespace: impl Into<String>) -> Self {
        Self {
            fetcher,
            cache,
            namespace: namespace.into(),
            expiration: DEFAULT_URL_EXPIRATION,
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn cache_key(&self, url: &str) -> String {
        format!("{}.open_url, url = {}", self.namespace, url)
    }

    /// Body of `url`, from the cache when `use_cache` allows and an entry
    /// exists, otherwise from the network.
    ///
    /// Only 2xx bodies are cached. A non-2xx status or a fetch error yields
    /// `None`.
    pub async fn open_url(&self, url: &str, use_cache: bool) -> Option<String> {
        let key = self.cache_key(url);
        let log_prefix = &self.cache.config().log_prefix;

        if use_cache {
            let cache = self.cache.clone();
            let lookup = key.clone();
            match tokio::task::spawn_blocking(move || cache.get_as::<String>(&lookup)).await {
                Ok(Some(body)) => {
                    tracing::debug!(cache = %log_prefix, url, "Serving URL from cache");
                    return Some(body);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(cache = %log_prefix, url, error = %e, "Cache lookup task failed");
                }
            }
        }

        let response = match self.fetcher.fetch(url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(cache = %log_prefix, url, error = %e, "Failed to fetch URL");
                return None;
            }
        };

        if !response.is_success() {
            tracing::error!(cache = %log_prefix, url, status = response.status, "Request failed");
            return None;
        }

        let cache = self.cache.clone();
        let body = response.body.clone();
        let options = SetOptions::new().with_expiration(self.expiration);
        match tokio::task::spawn_blocking(move || cache.set_with(&key, &body, &options)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(cache = %log_prefix, url, error = %e, "Failed to cache response");
            }
            Err(e) => {
                tracing::error!(cache = %log_prefix, url, error = %e, "Cache store task failed");
            }
        }

        Some(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryPropertyMap;
    use simplecache_core::{CacheConfig, CacheError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct MapFetcher {
        responses: HashMap<String, HttpResponse>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> CacheResult<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| CacheError::Fetch {
                    url: url.to_string(),
                    reason: "unreachable".to_string(),
                })
        }
    }

    fn fetcher_with(entries: &[(&str, HttpResponse)]) -> CachedFetcher<MapFetcher> {
        let cache = SimpleCache::builder(CacheConfig::new())
            .properties(Arc::new(InMemoryPropertyMap::new()))
            .cleanup_on_open(false)
            .build()
            .unwrap();
        let fetcher = MapFetcher {
            responses: entries
                .iter()
                .map(|(url, resp)| (url.to_string(), resp.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        };
        CachedFetcher::new(fetcher, cache, "srgssr")
    }

    #[test]
    fn test_cache_key_format() {
        let fetcher = fetcher_with(&[]);
        assert_eq!(
            fetcher.cache_key("https://example.org/a"),
            "srgssr.open_url, url = https://example.org/a"
        );
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let url = "https://example.org/shows";
        let fetcher = fetcher_with(&[(url, HttpResponse::ok("[1,2]"))]);

        assert_eq!(fetcher.open_url(url, true).await.as_deref(), Some("[1,2]"));
        assert_eq!(fetcher.open_url(url, true).await.as_deref(), Some("[1,2]"));
        assert_eq!(fetcher.fetcher.calls.load(Ordering::SeqCst), 1);

        fetcher.open_url(url, false).await;
        assert_eq!(fetcher.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_status_is_not_cached() {
        let url = "https://example.org/missing";
        let fetcher = fetcher_with(&[(
            url,
            HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: "not found".into(),
            },
        )]);

        assert_eq!(fetcher.open_url(url, true).await, None);
        assert_eq!(fetcher.open_url(url, true).await, None);
        assert_eq!(fetcher.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_is_none() {
        let fetcher = fetcher_with(&[]);
        assert_eq!(fetcher.open_url("https://example.org/down", true).await, None);
    }
}
