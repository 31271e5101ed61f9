//! Per-provider request metrics.

use crate::types::Usage;
use crate::utils::sync;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Counters a provider reports through [`MetricsReporter`](super::MetricsReporter).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_latency: Duration,
    pub average_latency: Duration,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub last_request_time: Option<SystemTime>,
    pub last_success_time: Option<SystemTime>,
    pub last_error_time: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl ProviderMetrics {
    /// Adds `other` into `self`. Timestamps keep the most recent value; `average_latency`
    /// is recomputed from the summed totals.
    pub fn merge(&mut self, other: &ProviderMetrics) {
        self.request_count += other.request_count;
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.total_latency = self.total_latency.saturating_add(other.total_latency);
        self.total_tokens += other.total_tokens;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.last_request_time = latest(self.last_request_time, other.last_request_time);
        self.last_success_time = latest(self.last_success_time, other.last_success_time);
        if latest(self.last_error_time, other.last_error_time) != self.last_error_time {
            self.last_error_time = other.last_error_time;
            self.last_error = other.last_error.clone();
        }
        self.average_latency = average(self.total_latency, self.success_count);
    }
}

fn latest(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((total.as_nanos() / count as u128) as u64)
    }
}

#[derive(Debug, Default)]
struct Times {
    last_request: Option<SystemTime>,
    last_success: Option<SystemTime>,
    last_error: Option<SystemTime>,
    last_error_message: Option<String>,
}

/// Thread-safe accumulator behind [`ProviderMetrics`].
#[derive(Debug, Default)]
pub struct ProviderMetricsTracker {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    latency_nanos: AtomicU64,
    total_tokens: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    times: Mutex<Times>,
}

impl ProviderMetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        sync::lock(&self.times).last_request = Some(SystemTime::now());
    }

    pub fn record_success(&self, latency: Duration, usage: Option<&Usage>) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        if let Some(u) = usage {
            self.total_tokens.fetch_add(u.total_tokens, Ordering::Relaxed);
            self.input_tokens.fetch_add(u.prompt_tokens, Ordering::Relaxed);
            self.output_tokens
                .fetch_add(u.completion_tokens, Ordering::Relaxed);
        }
        sync::lock(&self.times).last_success = Some(SystemTime::now());
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let mut times = sync::lock(&self.times);
        times.last_error = Some(SystemTime::now());
        times.last_error_message = Some(message.into());
    }

    pub fn snapshot(&self) -> ProviderMetrics {
        let times = sync::lock(&self.times);
        let success_count = self.successes.load(Ordering::Relaxed);
        let total_latency = Duration::from_nanos(self.latency_nanos.load(Ordering::Relaxed));
        ProviderMetrics {
            request_count: self.requests.load(Ordering::Relaxed),
            success_count,
            error_count: self.errors.load(Ordering::Relaxed),
            total_latency,
            average_latency: average(total_latency, success_count),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            last_request_time: times.last_request,
            last_success_time: times.last_success,
            last_error_time: times.last_error,
            last_error: times.last_error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_snapshot() {
        let t = ProviderMetricsTracker::new();
        t.record_request();
        t.record_success(Duration::from_millis(30), Some(&Usage::new(10, 5)));
        t.record_request();
        t.record_success(Duration::from_millis(10), None);
        t.record_request();
        t.record_error("boom");

        let m = t.snapshot();
        assert_eq!(m.request_count, 3);
        assert_eq!(m.success_count, 2);
        assert_eq!(m.error_count, 1);
        assert_eq!(m.average_latency, Duration::from_millis(20));
        assert_eq!(m.total_tokens, 15);
        assert_eq!(m.last_error.as_deref(), Some("boom"));
        assert!(m.last_request_time.is_some());
    }

    #[test]
    fn test_merge_recomputes_weighted_average() {
        let mut a = ProviderMetrics {
            success_count: 1,
            total_latency: Duration::from_millis(100),
            ..Default::default()
        };
        let b = ProviderMetrics {
            success_count: 3,
            total_latency: Duration::from_millis(100),
            last_error: Some("late".into()),
            last_error_time: Some(SystemTime::now()),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.success_count, 4);
        assert_eq!(a.average_latency, Duration::from_millis(50));
        assert_eq!(a.last_error.as_deref(), Some("late"));
    }
}
