//! Value types returned by [`MetricsCollector::snapshot`](super::MetricsCollector::snapshot).

use super::histogram::LatencyMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cache_read_tokens: u64,
    pub reasoning_tokens: u64,
    pub estimated_cost: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub by_type: HashMap<String, u64>,
    pub by_status_code: HashMap<u16, u64>,
    pub rate_limit_errors: u64,
    pub timeout_errors: u64,
    pub authentication_errors: u64,
    pub invalid_request_errors: u64,
    pub server_errors: u64,
    pub network_errors: u64,
    pub unknown_errors: u64,
    pub consecutive_errors: u64,
    pub last_error: Option<String>,
    pub last_error_time: Option<SystemTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingMetrics {
    pub total_streams: u64,
    pub successful_streams: u64,
    pub failed_streams: u64,
    /// Chunks reported by finished streams.
    pub total_chunks: u64,
    /// `stream_chunk` events received (only emitted when chunk events are enabled).
    pub chunk_events: u64,
    pub total_streamed_tokens: u64,
    pub min_stream_duration: Duration,
    pub max_stream_duration: Duration,
    pub avg_stream_duration: Duration,
    pub min_tokens_per_second: f64,
    pub max_tokens_per_second: f64,
    pub avg_tokens_per_second: f64,
    pub time_to_first_token: LatencyMetrics,
}

/// Mirror of the aggregate counters for one provider or one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownMetrics {
    pub name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub latency: LatencyMetrics,
    pub tokens: TokenMetrics,
    pub errors: ErrorMetrics,
    pub streaming: Option<StreamingMetrics>,
    pub last_updated: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub latency: LatencyMetrics,
    pub tokens: TokenMetrics,
    pub errors: ErrorMetrics,
    pub streaming: Option<StreamingMetrics>,
    pub provider_metrics: HashMap<String, BreakdownMetrics>,
    pub model_metrics: HashMap<String, BreakdownMetrics>,
    pub uptime: Duration,
    pub start_time: SystemTime,
    pub first_request_time: Option<SystemTime>,
    pub last_updated: Option<SystemTime>,
}

pub(crate) fn success_rate(successful: u64, failed: u64) -> f64 {
    let finished = successful + failed;
    if finished == 0 {
        0.0
    } else {
        successful as f64 / finished as f64
    }
}
