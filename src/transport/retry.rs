//! Exponential backoff for HTTP calls.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempts beyond this reuse the attempt-30 delay.
pub const MAX_BACKOFF_ATTEMPT: u32 = 30;

pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            retry_on_status: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Defaults, with `AI_HTTP_MAX_RETRIES` applied when set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env::var("AI_HTTP_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            cfg.max_retries = n;
        }
        cfg
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_multiplier(mut self, m: f64) -> Self {
        self.multiplier = m;
        self
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Delay before retry `attempt` (1-based): `min(max_delay, base * multiplier * 2^(attempt-1))`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let k = attempt.clamp(1, MAX_BACKOFF_ATTEMPT);
        let factor = self.multiplier.max(0.0) * f64::from(1u32 << (k - 1));
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Sleeps for `delay` unless `ctx` is cancelled first.
pub async fn sleep(ctx: &CancellationToken, delay: Duration) -> Result<()> {
    tokio::select! {
        _ = ctx.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Runs `op` until it succeeds, `is_retryable` rejects the error, or retries are exhausted.
///
/// `op` receives the 0-based attempt number.
pub async fn retry<T, F, Fut, R>(
    ctx: &CancellationToken,
    config: &RetryConfig,
    mut op: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let mut attempt = 0u32;
    loop {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config.max_retries && is_retryable(&e) => {
                attempt += 1;
                let delay = config.backoff(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                sleep(ctx, delay).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_defaults() {
        let c = RetryConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.base_delay, Duration::from_secs(1));
        assert_eq!(c.max_delay, Duration::from_secs(60));
        assert!(c.should_retry_status(503));
        assert!(!c.should_retry_status(404));
    }

    #[test]
    fn test_backoff_formula_and_cap() {
        let c = RetryConfig::default();
        assert_eq!(c.backoff(1), Duration::from_secs(2));
        assert_eq!(c.backoff(2), Duration::from_secs(4));
        assert_eq!(c.backoff(3), Duration::from_secs(8));
        assert_eq!(c.backoff(10), Duration::from_secs(60));
        assert_eq!(c.backoff(1000), Duration::from_secs(60));

        let tiny = RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_secs(u64::MAX / 2));
        assert!(tiny.backoff(30) > tiny.backoff(29));
        assert_eq!(tiny.backoff(31), tiny.backoff(30));
    }

    #[test]
    fn test_config_from_yaml_millis() {
        let c: RetryConfig = serde_yaml::from_str("max_retries: 5\nbase_delay: 250\n").unwrap();
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.base_delay, Duration::from_millis(250));
        assert_eq!(c.max_delay, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let cfg = RetryConfig::default().with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let out = retry(
            &CancellationToken::new(),
            &cfg,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::provider("p", "503"))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await
        .unwrap();
        assert_eq!(out, 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_and_skips_non_retryable() {
        let cfg = RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(2);
        let calls = AtomicU32::new(0);
        let res: Result<()> = retry(
            &CancellationToken::new(),
            &cfg,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::provider("p", "down")) }
            },
            |_| true,
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let res: Result<()> = retry(
            &CancellationToken::new(),
            &cfg,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::validation("bad")) }
            },
            |e| !matches!(e, Error::Validation { .. }),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_sleep_is_cancellable() {
        let cfg = RetryConfig::default();
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let res: Result<()> = retry(&ctx, &cfg, |_| async { Err(Error::provider("p", "x")) }, |_| true).await;
        assert!(res.unwrap_err().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
