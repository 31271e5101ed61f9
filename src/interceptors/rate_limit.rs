//! Token-bucket rate limiting as an interceptor.

use super::{Interceptor, Next};
use crate::types::{ChatRequest, ChatResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens per second.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
    /// Wait for a token instead of rejecting.
    #[serde(default)]
    pub wait: bool,
}

impl RateLimitConfig {
    /// Burst defaults to one second worth of tokens, at least 1.
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0),
            wait: false,
        })
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = burst.max(1.0);
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

pub struct RateLimitInterceptor {
    cfg: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimitInterceptor {
    pub fn new(cfg: RateLimitConfig) -> Self {
        let bucket = Mutex::new(Bucket {
            tokens: cfg.burst,
            last: Instant::now(),
        });
        Self { cfg, bucket }
    }

    /// Takes one token, or reports how long until one is available.
    async fn take(&self) -> std::result::Result<(), Duration> {
        let mut b = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(b.last).as_secs_f64();
        if elapsed > 0.0 {
            b.tokens = (b.tokens + elapsed * self.cfg.rps).min(self.cfg.burst);
            b.last = now;
        }
        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - b.tokens) / self.cfg.rps))
        }
    }

    pub async fn available_tokens(&self) -> f64 {
        self.bucket.lock().await.tokens
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn intercept(
        &self,
        ctx: CancellationToken,
        request: ChatRequest,
        next: Next,
    ) -> Result<ChatResponse> {
        loop {
            match self.take().await {
                Ok(()) => break,
                Err(wait) if self.cfg.wait => {
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Err(wait) => {
                    tracing::debug!(retry_after_ms = wait.as_millis() as u64, "request rate limited");
                    return Err(Error::hook(
                        "rate_limit",
                        format!("rate limit exceeded, retry after {:?}", wait),
                    ));
                }
            }
        }
        next.run(ctx, request).await
    }
}
