//! Retrying HTTP client for provider adapters.

use super::retry::{self, RetryConfig};
use super::TransportError;
use crate::utils::sync;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            retry: RetryConfig::default(),
            user_agent: None,
            proxy_url: None,
        }
    }
}

impl HttpConfig {
    /// Defaults overridden by `AI_HTTP_TIMEOUT_SECS`, `AI_HTTP_MAX_RETRIES` and `AI_PROXY_URL`.
    pub fn from_env() -> Self {
        let mut cfg = Self {
            retry: RetryConfig::from_env(),
            ..Self::default()
        };
        if let Some(secs) = env::var("AI_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            cfg.timeout_secs = secs;
        }
        cfg.proxy_url = env::var("AI_PROXY_URL").ok();
        cfg
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Runs on every outgoing request, including retries.
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, request: &mut reqwest::Request) -> Result<()>;
}

/// Runs on every response that is handed back to the caller.
pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, response: &mut reqwest::Response) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStats {
    pub requests: u64,
    pub attempts: u64,
    pub retries: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    latency_ms: AtomicU64,
}

pub struct HttpClient {
    client: reqwest::Client,
    config: HttpConfig,
    request_interceptors: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
    response_interceptors: RwLock<Vec<Arc<dyn ResponseInterceptor>>>,
    counters: Counters,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_idle_timeout(Some(Duration::from_secs(90)));
        if let Some(ua) = &config.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        if let Some(proxy_url) = &config.proxy_url {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;
        Ok(Self {
            client,
            config,
            request_interceptors: RwLock::new(Vec::new()),
            response_interceptors: RwLock::new(Vec::new()),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// The underlying `reqwest` client, for building requests.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) {
        sync::write(&self.request_interceptors).push(interceptor);
    }

    pub fn add_response_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>) {
        sync::write(&self.response_interceptors).push(interceptor);
    }

    pub fn stats(&self) -> HttpStats {
        let c = &self.counters;
        HttpStats {
            requests: c.requests.load(Ordering::Relaxed),
            attempts: c.attempts.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            total_latency_ms: c.latency_ms.load(Ordering::Relaxed),
        }
    }

    /// Sends `request`, retrying transient failures.
    ///
    /// Statuses in the retry set are retried; when retries run out they surface as
    /// [`TransportError::Status`]. Any other status is returned to the caller untouched.
    /// Requests with streaming bodies cannot be cloned and are sent once.
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        request: reqwest::Request,
    ) -> Result<reqwest::Response> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let retry_cfg = if request.try_clone().is_some() {
            self.config.retry.clone()
        } else {
            RetryConfig::none()
        };
        let template = request;

        let outcome = retry::retry(
            ctx,
            &retry_cfg,
            |attempt| {
                if attempt > 0 {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                }
                self.attempt(ctx, template.try_clone(), &retry_cfg)
            },
            is_transient,
        )
        .await;

        self.counters
            .latency_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        match outcome {
            Ok(mut response) => {
                let interceptors = sync::read(&self.response_interceptors).clone();
                for i in interceptors {
                    i.on_response(&mut response)?;
                }
                Ok(response)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "http request failed");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &CancellationToken,
        request: Option<reqwest::Request>,
        retry_cfg: &RetryConfig,
    ) -> Result<reqwest::Response> {
        let Some(mut request) = request else {
            return Err(Error::Transport(TransportError::Other(
                "request body cannot be replayed".into(),
            )));
        };
        let interceptors = sync::read(&self.request_interceptors).clone();
        for i in interceptors {
            i.on_request(&mut request)?;
        }
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method = %request.method(), url = %request.url(), "http attempt");

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            r = self.client.execute(request) => r.map_err(TransportError::Http)?,
        };
        let status = response.status().as_u16();
        if retry_cfg.should_retry_status(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body }.into());
        }
        Ok(response)
    }

    /// Sends `request` and decodes a successful JSON body. Non-2xx statuses become
    /// [`TransportError::Status`].
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        request: reqwest::Request,
    ) -> Result<T> {
        let response = self.execute(ctx, request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let bytes = response.bytes().await.map_err(TransportError::Http)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Sends `request` and returns its body as a byte stream (for SSE decoders).
    pub async fn execute_stream(
        &self,
        ctx: &CancellationToken,
        request: reqwest::Request,
    ) -> Result<BoxStream<'static, Bytes>> {
        let response = self.execute(ctx, request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let stream = response
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));
        Ok(Box::pin(stream))
    }
}

fn is_transient(error: &Error) -> bool {
    match error {
        Error::Transport(TransportError::Status { .. }) => true,
        Error::Transport(TransportError::Http(e)) => e.is_timeout() || e.is_connect(),
        _ => false,
    }
}

/// Adds a fixed header to every request.
pub struct HeaderInterceptor {
    name: reqwest::header::HeaderName,
    value: reqwest::header::HeaderValue,
}

impl HeaderInterceptor {
    pub fn new(name: &str, value: &str) -> Result<Self> {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::validation(format!("invalid header name '{}': {}", name, e)))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| Error::validation(format!("invalid header value: {}", e)))?;
        Ok(Self { name, value })
    }

    pub fn bearer(token: &str) -> Result<Self> {
        Self::new("authorization", &format!("Bearer {}", token))
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn on_request(&self, request: &mut reqwest::Request) -> Result<()> {
        request
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let c = HttpConfig::default();
        assert_eq!(c.timeout(), Duration::from_secs(60));
        assert_eq!(c.retry.max_retries, 3);
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&Error::Transport(TransportError::Status {
            status: 503,
            body: String::new()
        })));
        assert!(!is_transient(&Error::Transport(TransportError::Other("x".into()))));
        assert!(!is_transient(&Error::Cancelled));
    }

    #[test]
    fn test_header_interceptor_rejects_bad_header() {
        assert!(HeaderInterceptor::new("bad header", "v").is_err());
        assert!(HeaderInterceptor::bearer("abc").is_ok());
    }
}
