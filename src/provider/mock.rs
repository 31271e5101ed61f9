//! Scripted provider for tests and demos.

use super::{
    ChatProvider, HealthChecker, Lifecycle, MetricsReporter, ModelInfo, ModelInventory,
    Provider, ProviderConfig, ProviderMetrics, ProviderMetricsTracker, ProviderType,
};
use crate::types::{BoxChatStream, ChatChunk, ChatRequest, ChunkStream, Usage};
use crate::utils::sync;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Failure {
    message: String,
    status: Option<u16>,
}

impl Failure {
    fn to_error(&self, provider: &str) -> Error {
        Error::Provider {
            provider: provider.to_string(),
            message: self.message.clone(),
            status: self.status,
            payload: None,
        }
    }
}

/// Chat-capable provider that replays a fixed chunk script.
///
/// Every capability trait is implemented, so it can stand in for a real upstream anywhere.
pub struct MockProvider {
    name: String,
    description: String,
    model: String,
    chunks: Vec<ChatChunk>,
    chunk_delay: Duration,
    call_delay: Duration,
    failure: Option<Failure>,
    stream_failure: Option<(usize, Failure)>,
    healthy: AtomicBool,
    authenticated: AtomicBool,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
    config: Mutex<ProviderConfig>,
    tracker: ProviderMetricsTracker,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let chunks = vec![
            ChatChunk::text("mock-0", format!("Hello from {}", name)),
            ChatChunk::done("mock-0"),
        ];
        Self {
            config: Mutex::new(ProviderConfig::new(name.clone(), ProviderType::Mock)),
            description: format!("mock provider {}", name),
            name,
            model: "mock-model".to_string(),
            chunks,
            chunk_delay: Duration::ZERO,
            call_delay: Duration::ZERO,
            failure: None,
            stream_failure: None,
            healthy: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            tracker: ProviderMetricsTracker::new(),
        }
    }

    /// Single content chunk followed by a `done` chunk.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.chunks = vec![ChatChunk::text("mock-0", text), ChatChunk::done("mock-0")];
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<ChatChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Delay before each chunk is produced.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Delay before `generate_chat_completion` returns.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    /// Every call fails before a stream is produced.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(Failure {
            message: message.into(),
            status: None,
        });
        self
    }

    pub fn with_status_error(mut self, message: impl Into<String>, status: u16) -> Self {
        self.failure = Some(Failure {
            message: message.into(),
            status: Some(status),
        });
        self
    }

    /// The stream yields `after` chunks, then fails with `message`.
    pub fn with_stream_error_after(mut self, after: usize, message: impl Into<String>) -> Self {
        self.stream_failure = Some((
            after,
            Failure {
                message: message.into(),
                status: None,
            },
        ));
        self
    }

    pub fn with_healthy(self, healthy: bool) -> Self {
        self.healthy.store(healthy, Ordering::Relaxed);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        sync::lock(&self.last_request).clone()
    }

    fn script(&self) -> VecDeque<std::result::Result<ChatChunk, Failure>> {
        match &self.stream_failure {
            Some((after, failure)) => self
                .chunks
                .iter()
                .take(*after)
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(failure.clone())))
                .collect(),
            None => self.chunks.iter().cloned().map(Ok).collect(),
        }
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Mock
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn as_chat(&self) -> Option<&dyn ChatProvider> {
        Some(self)
    }

    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }

    fn as_inventory(&self) -> Option<&dyn ModelInventory> {
        Some(self)
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }

    fn as_metrics_reporter(&self) -> Option<&dyn MetricsReporter> {
        Some(self)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn generate_chat_completion(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<BoxChatStream> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tracker.record_request();
        *sync::lock(&self.last_request) = Some(request.clone());

        if !self.call_delay.is_zero() {
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.call_delay) => {}
            }
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(failure) = &self.failure {
            self.tracker.record_error(failure.message.clone());
            return Err(failure.to_error(&self.name));
        }

        let mut usage = Usage::default();
        for chunk in &self.chunks {
            if let Some(u) = &chunk.usage {
                usage.accumulate(u);
            }
        }
        self.tracker.record_success(started.elapsed(), Some(&usage));

        let delay = self.chunk_delay;
        let provider = self.name.clone();
        let ctx = ctx.clone();
        let script = self.script();
        let stream = futures::stream::unfold(script, move |mut script| {
            let ctx = ctx.clone();
            let provider = provider.clone();
            async move {
                let next = script.pop_front()?;
                if !delay.is_zero() {
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            script.clear();
                            return Some((Err(Error::Cancelled), script));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let item = next.map_err(|f| f.to_error(&provider));
                Some((item, script))
            }
        });
        Ok(ChunkStream::new(stream).boxed())
    }
}

#[async_trait]
impl HealthChecker for MockProvider {
    async fn health_check(&self, _ctx: &CancellationToken) -> Result<()> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::provider(&self.name, "health check failed"))
        }
    }
}

impl MetricsReporter for MockProvider {
    fn metrics(&self) -> ProviderMetrics {
        self.tracker.snapshot()
    }
}

#[async_trait]
impl Lifecycle for MockProvider {
    async fn authenticate(&self, _ctx: &CancellationToken) -> Result<()> {
        self.authenticated.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    async fn logout(&self, _ctx: &CancellationToken) -> Result<()> {
        self.authenticated.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn configure(&self, config: ProviderConfig) -> Result<()> {
        *sync::lock(&self.config) = config;
        Ok(())
    }

    fn config(&self) -> ProviderConfig {
        sync::lock(&self.config).clone()
    }
}

#[async_trait]
impl ModelInventory for MockProvider {
    async fn list_models(&self, _ctx: &CancellationToken) -> Result<Vec<ModelInfo>> {
        let mut info = ModelInfo::new(self.model.clone(), self.name.clone());
        info.supports_streaming = true;
        Ok(vec![info])
    }

    fn default_model(&self) -> String {
        sync::lock(&self.config)
            .default_model
            .clone()
            .unwrap_or_else(|| self.model.clone())
    }
}
