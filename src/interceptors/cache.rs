//! Response cache as an interceptor.

use super::{Interceptor, Next};
use crate::cache::{CacheBackend, CacheKeyGenerator, MemoryCache};
use crate::types::{ChatRequest, ChatResponse, MetadataExt};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request metadata flag that bypasses the cache for one call.
pub const NO_CACHE_KEY: &str = "no_cache";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

/// Serves identical requests from a [`CacheBackend`] without calling `next`.
///
/// Backend failures are counted and logged; they never fail the request.
pub struct CacheInterceptor {
    backend: Arc<dyn CacheBackend>,
    keys: CacheKeyGenerator,
    ttl: Duration,
    stats: AtomicStats,
}

impl CacheInterceptor {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            keys: CacheKeyGenerator::new(),
            ttl: Duration::from_secs(3600),
            stats: AtomicStats::default(),
        }
    }

    /// In-memory LRU backend holding `max_entries` responses.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(Arc::new(MemoryCache::new(max_entries)))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    fn error(&self, stage: &str, e: impl std::fmt::Display) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = self.backend.name(), stage, error = %e, "response cache error");
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    fn name(&self) -> &str {
        "cache"
    }

    async fn intercept(
        &self,
        ctx: CancellationToken,
        request: ChatRequest,
        next: Next,
    ) -> Result<ChatResponse> {
        if request.metadata.get_bool(NO_CACHE_KEY).unwrap_or(false) {
            return next.run(ctx, request).await;
        }

        let key = self.keys.generate(&request);
        match self.backend.get(&key).await {
            Ok(Some(data)) => match serde_json::from_slice::<ChatResponse>(&data) {
                Ok(resp) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "response cache hit");
                    return Ok(resp);
                }
                Err(e) => self.error("decode", e),
            },
            Ok(None) => {}
            Err(e) => self.error("get", e),
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let resp = next.run(ctx, request).await?;
        match serde_json::to_vec(&resp) {
            Ok(data) => match self.backend.set(&key, Bytes::from(data), self.ttl).await {
                Ok(()) => {
                    self.stats.sets.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => self.error("set", e),
            },
            Err(e) => self.error("encode", e),
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptors::{provider_fn, InterceptorChain, ProviderFn};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_provider(calls: Arc<AtomicUsize>) -> ProviderFn {
        provider_fn(move |_ctx, req: ChatRequest| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ChatResponse::new(format!("answer {}", n), req.model, "p")) }
        })
    }

    #[tokio::test]
    async fn test_second_identical_request_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(CacheInterceptor::in_memory(16));
        let chain = InterceptorChain::from_interceptors(vec![cache.clone()]);
        let req = ChatRequest::new("m").with_prompt("hi");

        let a = chain
            .execute(CancellationToken::new(), req.clone(), counting_provider(calls.clone()))
            .await
            .unwrap();
        let b = chain
            .execute(CancellationToken::new(), req, counting_provider(calls.clone()))
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn test_no_cache_flag_bypasses() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = InterceptorChain::from_interceptors(vec![Arc::new(CacheInterceptor::in_memory(16))]);
        let req = ChatRequest::new("m")
            .with_prompt("hi")
            .with_metadata(NO_CACHE_KEY, json!(true));
        for _ in 0..2 {
            chain
                .execute(CancellationToken::new(), req.clone(), counting_provider(calls.clone()))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let chain = InterceptorChain::from_interceptors(vec![Arc::new(CacheInterceptor::in_memory(16))]);
        let failing = provider_fn(|_ctx, _req: ChatRequest| async move {
            Err::<ChatResponse, _>(crate::Error::provider("p", "boom"))
        });
        let req = ChatRequest::new("m");
        assert!(chain
            .execute(CancellationToken::new(), req.clone(), failing)
            .await
            .is_err());
        let calls = Arc::new(AtomicUsize::new(0));
        chain
            .execute(CancellationToken::new(), req, counting_provider(calls.clone()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
