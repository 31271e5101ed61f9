//! Chat stream decorator that measures TTFT, throughput and chunk counts and reports the
//! stream lifecycle to a [`MetricsCollector`].

use super::collector::MetricsCollector;
use super::errors::ErrorCategory;
use super::event::{MetricEvent, MetricEventType};
use crate::types::{BoxChatStream, ChatChunk, ChatStream};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Per-stream measurements, readable at any point of the stream's life.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSessionMetrics {
    pub session_id: String,
    pub chunks_received: u64,
    pub tokens_received: u64,
    pub time_to_first_token: Option<Duration>,
    pub duration: Duration,
    pub tokens_per_second: f64,
    pub started: bool,
    pub completed: bool,
    pub aborted: bool,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
}

/// Builder for [`MetricsStream`]. `stream` and `collector` are required.
#[derive(Default)]
pub struct MetricsStreamBuilder {
    stream: Option<BoxChatStream>,
    collector: Option<Arc<MetricsCollector>>,
    provider_name: String,
    provider_type: String,
    model: String,
    session_id: Option<String>,
    emit_chunk_events: bool,
    ctx: Option<CancellationToken>,
}

impl MetricsStreamBuilder {
    pub fn stream(mut self, stream: BoxChatStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    pub fn provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = provider_type.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Emit a `stream_chunk` event for every chunk (off by default).
    pub fn emit_chunk_events(mut self, enabled: bool) -> Self {
        self.emit_chunk_events = enabled;
        self
    }

    /// Context passed to every `record` call.
    pub fn context(mut self, ctx: CancellationToken) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn build(self) -> Result<MetricsStream> {
        let inner = self.stream.ok_or_else(|| {
            Error::validation_with_context(
                "stream is required",
                ErrorContext::new()
                    .with_field_path("stream")
                    .with_source("metrics_stream"),
            )
        })?;
        let collector = self.collector.ok_or_else(|| {
            Error::validation_with_context(
                "metrics collector is required",
                ErrorContext::new()
                    .with_field_path("collector")
                    .with_source("metrics_stream"),
            )
        })?;
        let session_id = self.session_id.unwrap_or_else(generate_session_id);

        Ok(MetricsStream {
            inner,
            collector,
            ctx: self.ctx.unwrap_or_default(),
            provider_name: self.provider_name,
            provider_type: self.provider_type,
            model: self.model,
            emit_chunk_events: self.emit_chunk_events,
            session_id,
            start: None,
            first_chunk: None,
            last_chunk: None,
            chunks: 0,
            tokens: 0,
            completed: false,
            aborted: false,
            closed: false,
            error: None,
        })
    }
}

fn generate_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("stream-{}", nanos)
}

/// Observationally transparent wrapper: same chunks, same order, same terminal signal.
///
/// Emits `stream_start` (with TTFT) on the first chunk, optional `stream_chunk` events and
/// exactly one terminal event: `stream_end` on completion or early close, `stream_abort`
/// when the inner stream fails. Metric failures are logged and never surface to the reader.
pub struct MetricsStream {
    inner: BoxChatStream,
    collector: Arc<MetricsCollector>,
    ctx: CancellationToken,
    provider_name: String,
    provider_type: String,
    model: String,
    emit_chunk_events: bool,
    session_id: String,
    start: Option<Instant>,
    first_chunk: Option<Instant>,
    last_chunk: Option<Instant>,
    chunks: u64,
    tokens: u64,
    completed: bool,
    aborted: bool,
    closed: bool,
    error: Option<(String, ErrorCategory)>,
}

impl MetricsStream {
    pub fn builder() -> MetricsStreamBuilder {
        MetricsStreamBuilder::default()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn metrics(&self) -> StreamSessionMetrics {
        let duration = self.duration();
        StreamSessionMetrics {
            session_id: self.session_id.clone(),
            chunks_received: self.chunks,
            tokens_received: self.tokens,
            time_to_first_token: self.ttft(),
            duration,
            tokens_per_second: tokens_per_second(self.tokens, duration),
            started: self.start.is_some(),
            completed: self.completed,
            aborted: self.aborted,
            error: self.error.as_ref().map(|(m, _)| m.clone()),
            error_category: self.error.as_ref().map(|(_, c)| *c),
        }
    }

    fn finished(&self) -> bool {
        self.completed || self.aborted
    }

    fn duration(&self) -> Duration {
        match (self.start, self.last_chunk) {
            (Some(start), Some(last)) => last.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    fn ttft(&self) -> Option<Duration> {
        Some(self.first_chunk?.saturating_duration_since(self.start?))
    }

    fn event(&self, event_type: MetricEventType) -> MetricEvent {
        MetricEvent::new(event_type, self.provider_name.clone())
            .with_provider_type(self.provider_type.clone())
            .with_model(self.model.clone())
            .with_streaming(self.session_id.clone())
    }

    async fn record(&mut self, event: MetricEvent) {
        emit(&self.collector, &self.ctx, &self.session_id, event).await;
    }

    async fn on_chunk(&mut self, chunk: &ChatChunk) {
        let now = Instant::now();
        if self.first_chunk.is_none() {
            self.first_chunk = Some(now);
            let ttft = self.ttft().unwrap_or_default();
            let event = self.event(MetricEventType::StreamStart).with_ttft(ttft);
            self.record(event).await;
        }

        self.chunks += 1;
        self.last_chunk = Some(now);
        let tokens = chunk_tokens(chunk);
        self.tokens += tokens;

        if self.emit_chunk_events {
            let event = self
                .event(MetricEventType::StreamChunk)
                .with_chunk_index(self.chunks)
                .with_tokens(tokens, 0, tokens);
            self.record(event).await;
        }
    }

    async fn complete(&mut self) {
        if self.finished() {
            return;
        }
        self.completed = true;
        let duration = self.duration();
        let event = self
            .event(MetricEventType::StreamEnd)
            .with_latency(duration)
            .with_tokens(self.tokens, 0, self.tokens)
            .with_chunk_index(self.chunks)
            .with_ttft(self.ttft().unwrap_or_default())
            .with_tokens_per_second(tokens_per_second(self.tokens, duration));
        tracing::debug!(
            session = %self.session_id,
            provider = %self.provider_name,
            chunks = self.chunks,
            tokens = self.tokens,
            "stream completed"
        );
        self.record(event).await;
    }

    async fn abort(&mut self, error: &Error) {
        if self.finished() {
            return;
        }
        self.aborted = true;
        let message = error.to_string();
        let category = ErrorCategory::from_message(&message);
        self.error = Some((message.clone(), category));

        let duration = self.duration();
        let mut event = self
            .event(MetricEventType::StreamAbort)
            .with_latency(duration)
            .with_tokens(self.tokens, 0, self.tokens)
            .with_chunk_index(self.chunks)
            .with_ttft(self.ttft().unwrap_or_default())
            .with_tokens_per_second(tokens_per_second(self.tokens, duration))
            .with_error_type(category.as_str())
            .with_error_message(message);
        if let Some(status) = error.status_code() {
            event = event.with_status_code(status);
        }
        tracing::debug!(
            session = %self.session_id,
            provider = %self.provider_name,
            category = %category,
            "stream aborted"
        );
        self.record(event).await;
    }
}

#[async_trait]
impl ChatStream for MetricsStream {
    async fn recv(&mut self) -> Result<Option<ChatChunk>> {
        if self.finished() || self.closed {
            return Ok(None);
        }
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }

        match self.inner.recv().await {
            Ok(Some(chunk)) => {
                self.on_chunk(&chunk).await;
                if chunk.done {
                    self.complete().await;
                }
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.complete().await;
                Ok(None)
            }
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.inner.close().await;
        if self.start.is_some() {
            self.complete().await;
        }
        result
    }
}

async fn emit(
    collector: &MetricsCollector,
    ctx: &CancellationToken,
    session: &str,
    event: MetricEvent,
) {
    if let Err(e) = collector.record(ctx, event).await {
        tracing::debug!(session = %session, error = %e, "stream metric dropped");
    }
}

/// Tokens carried by one chunk: explicit usage first, else a 4-bytes-per-token estimate.
fn chunk_tokens(chunk: &ChatChunk) -> u64 {
    match chunk.usage {
        Some(u) if u.completion_tokens > 0 => u.completion_tokens,
        Some(u) if u.total_tokens > 0 => u.total_tokens,
        _ => crate::tokens::estimate_tokens_from_bytes(chunk.content_len()) as u64,
    }
}

fn tokens_per_second(tokens: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        tokens as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkStream, Usage};

    #[test]
    fn test_builder_requires_stream_and_collector() {
        let err = MetricsStream::builder()
            .collector(Arc::new(MetricsCollector::new()))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.context().unwrap().field_path.as_deref(), Some("stream"));

        let err = MetricsStream::builder()
            .stream(ChunkStream::from_chunks(vec![]).boxed())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_chunk_token_preference() {
        let with_completion = ChatChunk::text("1", "abcdefgh").with_usage(Usage::new(100, 7));
        assert_eq!(chunk_tokens(&with_completion), 7);
        let total_only = ChatChunk::text("1", "x").with_usage(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 9,
        });
        assert_eq!(chunk_tokens(&total_only), 9);
        assert_eq!(chunk_tokens(&ChatChunk::text("1", "abcdefghij")), 2);
    }

    #[test]
    fn test_generated_session_id() {
        let s = MetricsStream::builder()
            .stream(ChunkStream::from_chunks(vec![]).boxed())
            .collector(Arc::new(MetricsCollector::new()))
            .build()
            .unwrap();
        assert!(s.session_id().starts_with("stream-"));
        assert!(!s.metrics().started);
    }

    #[tokio::test]
    async fn test_close_before_read_emits_nothing() {
        let hub = Arc::new(MetricsCollector::new());
        let mut s = MetricsStream::builder()
            .stream(ChunkStream::from_chunks(vec![ChatChunk::text("1", "a")]).boxed())
            .collector(Arc::clone(&hub))
            .provider("p")
            .build()
            .unwrap();
        s.close().await.unwrap();
        s.close().await.unwrap();
        assert!(hub.snapshot().streaming.is_none());
        assert!(s.recv().await.unwrap().is_none());
    }
}
