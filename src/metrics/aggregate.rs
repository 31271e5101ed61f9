//! Counter set shared by the global aggregate and every per-provider / per-model shard.

use super::errors::ErrorCategory;
use super::event::{MetricEvent, MetricEventType};
use super::histogram::Histogram;
use super::snapshot::{
    success_rate, BreakdownMetrics, ErrorMetrics, StreamingMetrics, TokenMetrics,
};
use crate::tokens::{CostBreakdown, DEFAULT_CURRENCY};
use crate::types::MetadataExt;
use crate::utils::sync;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Debug, Default)]
struct TokenCounters {
    total: AtomicU64,
    input: AtomicU64,
    output: AtomicU64,
    cached: AtomicU64,
    cache_read: AtomicU64,
    reasoning: AtomicU64,
}

#[derive(Debug)]
struct Cost {
    amount: f64,
    currency: String,
}

#[derive(Debug, Default)]
struct StreamingState {
    total: u64,
    successful: u64,
    failed: u64,
    total_chunks: u64,
    chunk_events: u64,
    streamed_tokens: u64,
    durations: u64,
    duration_sum: Duration,
    min_duration: Duration,
    max_duration: Duration,
    tps_samples: u64,
    tps_sum: f64,
    min_tps: f64,
    max_tps: f64,
}

/// Lock-light counters. Totals and tokens are plain atomics; the breakdown maps and
/// streaming stats sit behind short mutexes.
#[derive(Debug)]
pub(crate) struct Aggregate {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    latency: Histogram,
    tokens: TokenCounters,
    cost: Mutex<Cost>,
    errors: Mutex<ErrorMetrics>,
    streaming: Mutex<StreamingState>,
    ttft: Histogram,
    last_updated: Mutex<Option<SystemTime>>,
}

impl Aggregate {
    pub(crate) fn new(histogram_capacity: usize) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            latency: Histogram::with_capacity(histogram_capacity),
            tokens: TokenCounters::default(),
            cost: Mutex::new(Cost {
                amount: 0.0,
                currency: DEFAULT_CURRENCY.to_string(),
            }),
            errors: Mutex::new(ErrorMetrics::default()),
            streaming: Mutex::new(StreamingState::default()),
            ttft: Histogram::with_capacity(histogram_capacity),
            last_updated: Mutex::new(None),
        }
    }

    pub(crate) fn apply(&self, event: &MetricEvent, cost: Option<&CostBreakdown>) {
        match event.event_type {
            MetricEventType::Request => {
                self.total_requests.fetch_add(1, Ordering::Relaxed);
            }
            MetricEventType::Success => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
                if event.latency > Duration::ZERO {
                    self.latency.add(event.latency);
                }
            }
            t if t.is_failure() => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
            t if t.is_stream() => self.apply_stream(event),
            _ => {}
        }
        self.apply_errors(event);

        if event.counts_tokens() {
            self.apply_tokens(event, cost);
        }
        *sync::lock(&self.last_updated) = Some(event.timestamp);
    }

    fn apply_errors(&self, event: &MetricEvent) {
        let mut errors = sync::lock(&self.errors);
        if !event.event_type.is_failure() {
            errors.consecutive_errors = 0;
            return;
        }

        errors.total_errors += 1;
        errors.consecutive_errors += 1;
        let kind = if event.error_type.is_empty() {
            event.event_type.as_str().to_string()
        } else {
            event.error_type.clone()
        };
        *errors.by_type.entry(kind).or_insert(0) += 1;
        if event.status_code > 0 {
            *errors.by_status_code.entry(event.status_code).or_insert(0) += 1;
        }
        match categorize(event) {
            ErrorCategory::RateLimit => errors.rate_limit_errors += 1,
            ErrorCategory::Timeout => errors.timeout_errors += 1,
            ErrorCategory::Authentication => errors.authentication_errors += 1,
            ErrorCategory::InvalidRequest => errors.invalid_request_errors += 1,
            ErrorCategory::ServerError => errors.server_errors += 1,
            ErrorCategory::Network => errors.network_errors += 1,
            ErrorCategory::Unknown => errors.unknown_errors += 1,
        }
        if !event.error_message.is_empty() {
            errors.last_error = Some(event.error_message.clone());
        }
        errors.last_error_time = Some(event.timestamp);
    }

    fn apply_tokens(&self, event: &MetricEvent, cost: Option<&CostBreakdown>) {
        let total = if event.tokens_used > 0 {
            event.tokens_used
        } else {
            event.input_tokens + event.output_tokens
        };
        let t = &self.tokens;
        t.total.fetch_add(total, Ordering::Relaxed);
        t.input.fetch_add(event.input_tokens, Ordering::Relaxed);
        t.output.fetch_add(event.output_tokens, Ordering::Relaxed);
        let md = &event.metadata;
        t.cached
            .fetch_add(md.get_u64("cached_tokens").unwrap_or(0), Ordering::Relaxed);
        t.cache_read
            .fetch_add(md.get_u64("cache_read_tokens").unwrap_or(0), Ordering::Relaxed);
        t.reasoning
            .fetch_add(md.get_u64("reasoning_tokens").unwrap_or(0), Ordering::Relaxed);

        if let Some(c) = cost {
            if c.total_cost > 0.0 {
                let mut acc = sync::lock(&self.cost);
                acc.amount += c.total_cost;
                acc.currency = c.currency.clone();
            }
        }
    }

    fn apply_stream(&self, event: &MetricEvent) {
        if event.event_type == MetricEventType::StreamStart {
            if event.time_to_first_token > Duration::ZERO {
                self.ttft.add(event.time_to_first_token);
            }
            return;
        }

        let mut s = sync::lock(&self.streaming);
        match event.event_type {
            MetricEventType::StreamChunk => s.chunk_events += 1,
            MetricEventType::StreamEnd | MetricEventType::StreamAbort => {
                s.total += 1;
                if event.event_type == MetricEventType::StreamEnd {
                    s.successful += 1;
                } else {
                    s.failed += 1;
                }
                s.total_chunks += event.stream_chunk_index;
                s.streamed_tokens += event.tokens_used.max(event.output_tokens);

                let d = event.latency;
                if s.durations == 0 || d < s.min_duration {
                    s.min_duration = d;
                }
                if d > s.max_duration {
                    s.max_duration = d;
                }
                s.durations += 1;
                s.duration_sum = s.duration_sum.saturating_add(d);

                let tps = event.tokens_per_second;
                if tps > 0.0 {
                    if s.tps_samples == 0 || tps < s.min_tps {
                        s.min_tps = tps;
                    }
                    if tps > s.max_tps {
                        s.max_tps = tps;
                    }
                    s.tps_samples += 1;
                    s.tps_sum += tps;
                }
            }
            _ => {}
        }
    }

    pub(crate) fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn latency(&self) -> &Histogram {
        &self.latency
    }

    pub(crate) fn tokens(&self) -> TokenMetrics {
        let t = &self.tokens;
        let cost = sync::lock(&self.cost);
        TokenMetrics {
            total_tokens: t.total.load(Ordering::Relaxed),
            input_tokens: t.input.load(Ordering::Relaxed),
            output_tokens: t.output.load(Ordering::Relaxed),
            cached_tokens: t.cached.load(Ordering::Relaxed),
            cache_read_tokens: t.cache_read.load(Ordering::Relaxed),
            reasoning_tokens: t.reasoning.load(Ordering::Relaxed),
            estimated_cost: cost.amount,
            currency: cost.currency.clone(),
        }
    }

    pub(crate) fn errors(&self) -> ErrorMetrics {
        sync::lock(&self.errors).clone()
    }

    pub(crate) fn streaming(&self) -> Option<StreamingMetrics> {
        let ttft = self.ttft.snapshot();
        let s = sync::lock(&self.streaming);
        if s.total == 0 && s.chunk_events == 0 && ttft.count == 0 {
            return None;
        }
        let avg_duration = if s.durations == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((s.duration_sum.as_nanos() / s.durations as u128) as u64)
        };
        let avg_tps = if s.tps_samples == 0 {
            0.0
        } else {
            s.tps_sum / s.tps_samples as f64
        };
        Some(StreamingMetrics {
            total_streams: s.total,
            successful_streams: s.successful,
            failed_streams: s.failed,
            total_chunks: s.total_chunks,
            chunk_events: s.chunk_events,
            total_streamed_tokens: s.streamed_tokens,
            min_stream_duration: s.min_duration,
            max_stream_duration: s.max_duration,
            avg_stream_duration: avg_duration,
            min_tokens_per_second: s.min_tps,
            max_tokens_per_second: s.max_tps,
            avg_tokens_per_second: avg_tps,
            time_to_first_token: ttft,
        })
    }

    pub(crate) fn last_updated(&self) -> Option<SystemTime> {
        *sync::lock(&self.last_updated)
    }

    pub(crate) fn breakdown(&self, name: &str) -> BreakdownMetrics {
        let successful = self.successful_requests();
        let failed = self.failed_requests();
        BreakdownMetrics {
            name: name.to_string(),
            total_requests: self.total_requests(),
            successful_requests: successful,
            failed_requests: failed,
            success_rate: success_rate(successful, failed),
            latency: self.latency.snapshot(),
            tokens: self.tokens(),
            errors: self.errors(),
            streaming: self.streaming(),
            last_updated: self.last_updated(),
        }
    }
}

/// Bucket for a failure event: explicit event kind, then HTTP status, then a known
/// `error_type` name, then a keyword scan of the message.
pub(crate) fn categorize(event: &MetricEvent) -> ErrorCategory {
    match event.event_type {
        MetricEventType::RateLimit => return ErrorCategory::RateLimit,
        MetricEventType::Timeout => return ErrorCategory::Timeout,
        _ => {}
    }
    if let Some(c) = ErrorCategory::from_status(event.status_code) {
        return c;
    }
    if let Some(c) = ErrorCategory::from_name(&event.error_type) {
        return c;
    }
    ErrorCategory::from_message(&event.error_message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_errors_reset_on_non_error() {
        let agg = Aggregate::new(16);
        agg.apply(&MetricEvent::error("p", "x"), None);
        agg.apply(
            &MetricEvent::new(MetricEventType::Timeout, "p"),
            None,
        );
        assert_eq!(agg.errors().consecutive_errors, 2);
        agg.apply(&MetricEvent::request("p"), None);
        assert_eq!(agg.errors().consecutive_errors, 0);
        assert_eq!(agg.errors().total_errors, 2);
        assert_eq!(agg.failed_requests(), 2);
    }

    #[test]
    fn test_error_buckets() {
        let agg = Aggregate::new(16);
        agg.apply(&MetricEvent::error("p", "boom").with_status_code(503), None);
        agg.apply(&MetricEvent::error("p", "nope").with_status_code(401), None);
        agg.apply(&MetricEvent::new(MetricEventType::RateLimit, "p"), None);
        agg.apply(&MetricEvent::error("p", "connection reset"), None);
        agg.apply(
            &MetricEvent::error("p", "x").with_error_type("provider_incompatible"),
            None,
        );

        let e = agg.errors();
        assert_eq!(e.server_errors, 1);
        assert_eq!(e.authentication_errors, 1);
        assert_eq!(e.rate_limit_errors, 1);
        assert_eq!(e.network_errors, 1);
        assert_eq!(e.unknown_errors, 1);
        assert_eq!(e.by_status_code[&503], 1);
        assert_eq!(e.by_type["error"], 3);
        assert_eq!(e.by_type["rate_limit"], 1);
        assert_eq!(e.by_type["provider_incompatible"], 1);
        assert_eq!(e.last_error.as_deref(), Some("x"));
    }

    #[test]
    fn test_tokens_fall_back_to_input_plus_output() {
        let agg = Aggregate::new(16);
        let event = MetricEvent::success("p")
            .with_tokens(0, 20, 30)
            .with_metadata("cached_tokens", 5)
            .with_metadata("reasoning_tokens", 7);
        agg.apply(&event, None);
        let t = agg.tokens();
        assert_eq!(t.total_tokens, 50);
        assert_eq!(t.cached_tokens, 5);
        assert_eq!(t.reasoning_tokens, 7);
        assert_eq!(t.cache_read_tokens, 0);
    }

    #[test]
    fn test_only_positive_success_latency_is_recorded() {
        let agg = Aggregate::new(16);
        agg.apply(&MetricEvent::success("p"), None);
        agg.apply(
            &MetricEvent::error("p", "x").with_latency(Duration::from_millis(5)),
            None,
        );
        assert_eq!(agg.latency().count(), 0);
        agg.apply(
            &MetricEvent::success("p").with_latency(Duration::from_millis(5)),
            None,
        );
        assert_eq!(agg.latency().count(), 1);
    }

    #[test]
    fn test_stream_stats() {
        let agg = Aggregate::new(16);
        assert!(agg.streaming().is_none());

        agg.apply(
            &MetricEvent::new(MetricEventType::StreamStart, "p")
                .with_ttft(Duration::from_millis(12)),
            None,
        );
        agg.apply(
            &MetricEvent::new(MetricEventType::StreamEnd, "p")
                .with_latency(Duration::from_millis(100))
                .with_tokens(50, 0, 50)
                .with_chunk_index(3)
                .with_tokens_per_second(500.0),
            None,
        );
        agg.apply(
            &MetricEvent::new(MetricEventType::StreamAbort, "p")
                .with_latency(Duration::from_millis(300))
                .with_chunk_index(1),
            None,
        );

        let s = agg.streaming().unwrap();
        assert_eq!(s.total_streams, 2);
        assert_eq!(s.successful_streams, 1);
        assert_eq!(s.failed_streams, 1);
        assert_eq!(s.total_chunks, 4);
        assert_eq!(s.total_streamed_tokens, 50);
        assert_eq!(s.min_stream_duration, Duration::from_millis(100));
        assert_eq!(s.max_stream_duration, Duration::from_millis(300));
        assert_eq!(s.avg_stream_duration, Duration::from_millis(200));
        assert_eq!(s.max_tokens_per_second, 500.0);
        assert_eq!(s.time_to_first_token.count, 1);
        // Stream aborts are not request failures.
        assert_eq!(agg.failed_requests(), 0);
    }
}
