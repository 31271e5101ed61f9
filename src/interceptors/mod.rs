//! Interceptor chain: composable around-advice for the provider call.
//!
//! An [`Interceptor`] receives the request and a [`Next`] handle. It may rewrite the request
//! before calling `next.run`, rewrite the response afterwards, or skip `next` entirely to
//! short-circuit (cached answer, rejection).
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`InterceptorChain`] | Ordered list, snapshotted per execution |
//! | [`InterceptorRegistry`] | Named store for assembling chains |
//! | [`CacheInterceptor`] | Serves repeated requests from a [`CacheBackend`](crate::cache::CacheBackend) |
//! | [`RateLimitInterceptor`] | Token bucket, rejects when empty |
//! | [`LoggingInterceptor`] | `tracing` span around each call |

mod cache;
mod logging;
mod rate_limit;
mod registry;

pub use cache::{CacheInterceptor, CacheStats};
pub use logging::LoggingInterceptor;
pub use rate_limit::{RateLimitConfig, RateLimitInterceptor};
pub use registry::InterceptorRegistry;

use crate::types::{ChatRequest, ChatResponse};
use crate::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal call at the end of a chain.
pub type ProviderFn = Arc<
    dyn Fn(CancellationToken, ChatRequest) -> BoxFuture<'static, Result<ChatResponse>> + Send + Sync,
>;

/// Wraps an async closure as a [`ProviderFn`].
pub fn provider_fn<F, Fut>(f: F) -> ProviderFn
where
    F: Fn(CancellationToken, ChatRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ChatResponse>> + Send + 'static,
{
    Arc::new(move |ctx, req| -> BoxFuture<'static, Result<ChatResponse>> {
        Box::pin(f(ctx, req))
    })
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn intercept(
        &self,
        ctx: CancellationToken,
        request: ChatRequest,
        next: Next,
    ) -> Result<ChatResponse>;
}

/// The rest of the chain after the current interceptor.
#[derive(Clone)]
pub struct Next {
    chain: Arc<Vec<Arc<dyn Interceptor>>>,
    index: usize,
    terminal: ProviderFn,
}

impl Next {
    fn new(chain: Arc<Vec<Arc<dyn Interceptor>>>, terminal: ProviderFn) -> Self {
        Self {
            chain,
            index: 0,
            terminal,
        }
    }

    pub fn run(
        self,
        ctx: CancellationToken,
        request: ChatRequest,
    ) -> BoxFuture<'static, Result<ChatResponse>> {
        Box::pin(async move {
            match self.chain.get(self.index).cloned() {
                Some(interceptor) => {
                    let next = Next {
                        chain: Arc::clone(&self.chain),
                        index: self.index + 1,
                        terminal: Arc::clone(&self.terminal),
                    };
                    interceptor.intercept(ctx, request, next).await
                }
                None => (self.terminal)(ctx, request).await,
            }
        })
    }
}

/// Ordered interceptors; index 0 is outermost.
///
/// `add` may race with `execute`: each execution works on the list as it was when the
/// execution started.
pub struct InterceptorChain {
    interceptors: ArcSwap<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            interceptors: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn from_interceptors(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: ArcSwap::from_pointee(interceptors),
        }
    }

    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&interceptor));
            next
        });
    }

    pub fn len(&self) -> usize {
        self.interceptors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.interceptors
            .load()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    pub async fn execute(
        &self,
        ctx: CancellationToken,
        request: ChatRequest,
        provider: ProviderFn,
    ) -> Result<ChatResponse> {
        let snapshot = self.interceptors.load_full();
        if snapshot.is_empty() {
            return provider(ctx, request).await;
        }
        Next::new(snapshot, provider).run(ctx, request).await
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}
