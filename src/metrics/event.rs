//! Metric events and event filters.

use crate::types::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricEventType {
    Request,
    Success,
    Error,
    Timeout,
    RateLimit,
    StreamStart,
    StreamChunk,
    StreamEnd,
    StreamAbort,
    HealthCheck,
    Initialization,
}

impl MetricEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricEventType::Request => "request",
            MetricEventType::Success => "success",
            MetricEventType::Error => "error",
            MetricEventType::Timeout => "timeout",
            MetricEventType::RateLimit => "rate_limit",
            MetricEventType::StreamStart => "stream_start",
            MetricEventType::StreamChunk => "stream_chunk",
            MetricEventType::StreamEnd => "stream_end",
            MetricEventType::StreamAbort => "stream_abort",
            MetricEventType::HealthCheck => "health_check",
            MetricEventType::Initialization => "initialization",
        }
    }

    /// Error, timeout and rate-limit events count as failed requests.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            MetricEventType::Error | MetricEventType::Timeout | MetricEventType::RateLimit
        )
    }

    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            MetricEventType::StreamStart
                | MetricEventType::StreamChunk
                | MetricEventType::StreamEnd
                | MetricEventType::StreamAbort
        )
    }
}

impl fmt::Display for MetricEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle observation. Zero / empty fields mean "not reported".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    #[serde(rename = "type")]
    pub event_type: MetricEventType,
    pub provider_name: String,
    #[serde(default)]
    pub provider_type: String,
    #[serde(default)]
    pub model_id: String,
    pub timestamp: SystemTime,
    #[serde(default)]
    pub latency: Duration,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream_session_id: String,
    #[serde(default)]
    pub stream_chunk_index: u64,
    #[serde(default)]
    pub time_to_first_token: Duration,
    #[serde(default)]
    pub tokens_per_second: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl MetricEvent {
    pub fn new(event_type: MetricEventType, provider_name: impl Into<String>) -> Self {
        Self {
            event_type,
            provider_name: provider_name.into(),
            provider_type: String::new(),
            model_id: String::new(),
            timestamp: SystemTime::now(),
            latency: Duration::ZERO,
            tokens_used: 0,
            input_tokens: 0,
            output_tokens: 0,
            is_streaming: false,
            stream_session_id: String::new(),
            stream_chunk_index: 0,
            time_to_first_token: Duration::ZERO,
            tokens_per_second: 0.0,
            error_type: String::new(),
            error_message: String::new(),
            status_code: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn request(provider: impl Into<String>) -> Self {
        Self::new(MetricEventType::Request, provider)
    }

    pub fn success(provider: impl Into<String>) -> Self {
        Self::new(MetricEventType::Success, provider)
    }

    pub fn error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(MetricEventType::Error, provider).with_error_message(message)
    }

    pub fn with_provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = provider_type.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_id = model.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_tokens(mut self, total: u64, input: u64, output: u64) -> Self {
        self.tokens_used = total;
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_streaming(mut self, session_id: impl Into<String>) -> Self {
        self.is_streaming = true;
        self.stream_session_id = session_id.into();
        self
    }

    pub fn with_chunk_index(mut self, index: u64) -> Self {
        self.stream_chunk_index = index;
        self
    }

    pub fn with_ttft(mut self, ttft: Duration) -> Self {
        self.time_to_first_token = ttft;
        self
    }

    pub fn with_tokens_per_second(mut self, tps: f64) -> Self {
        self.tokens_per_second = tps;
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_tokens(&self) -> bool {
        self.tokens_used > 0 || self.input_tokens > 0 || self.output_tokens > 0
    }

    /// Whether the token fields feed the hub's token counters. Per-chunk counts are
    /// already included in the terminal stream event.
    pub(crate) fn counts_tokens(&self) -> bool {
        self.has_tokens() && self.event_type != MetricEventType::StreamChunk
    }
}

/// Selects events by provider, model and type. An absent or empty set matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricFilter {
    pub provider_names: Option<HashSet<String>>,
    pub model_ids: Option<HashSet<String>>,
    pub event_types: Option<HashSet<MetricEventType>>,
}

impl MetricFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provider_names = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_ids = Some(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_event_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = MetricEventType>,
    {
        self.event_types = Some(types.into_iter().collect());
        self
    }

    pub fn matches(&self, event: &MetricEvent) -> bool {
        fn allows<T: Eq + std::hash::Hash>(set: &Option<HashSet<T>>, value: &T) -> bool {
            match set {
                Some(s) if !s.is_empty() => s.contains(value),
                _ => true,
            }
        }
        allows(&self.provider_names, &event.provider_name)
            && allows(&self.model_ids, &event.model_id)
            && allows(&self.event_types, &event.event_type)
    }
}
