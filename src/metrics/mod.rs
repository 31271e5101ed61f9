//! Metrics core: a non-blocking event hub and a streaming measurement wrapper.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricsCollector`] | Event hub: counters, per-provider / per-model shards, subscriptions, hooks, snapshots |
//! | [`Histogram`] | Fixed-capacity circular buffer with linear-interpolated percentiles |
//! | [`Subscription`] | Bounded, filtered event channel with an overflow counter |
//! | [`MetricsHook`] | Advisory callback, bounded by [`HOOK_TIMEOUT`] |
//! | [`MetricsStream`] | Chat stream decorator emitting `stream_*` events |
//! | [`ErrorCategory`] | Keyword / status based error classification |
//!
//! ```rust,no_run
//! use ai_lib_gateway::metrics::{MetricEvent, MetricsCollector};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> ai_lib_gateway::Result<()> {
//! let hub = MetricsCollector::new();
//! let ctx = CancellationToken::new();
//! hub.record(&ctx, MetricEvent::request("openai").with_model("gpt-4o")).await?;
//! hub.record(
//!     &ctx,
//!     MetricEvent::success("openai")
//!         .with_model("gpt-4o")
//!         .with_latency(Duration::from_millis(120))
//!         .with_tokens(150, 50, 100),
//! )
//! .await?;
//! assert_eq!(hub.snapshot().success_rate, 1.0);
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod collector;
mod errors;
mod event;
mod histogram;
mod hooks;
mod snapshot;
mod stream;
mod subscription;

pub use collector::{global_collector, CollectorConfig, MetricsCollector};
pub use errors::ErrorCategory;
pub use event::{MetricEvent, MetricEventType, MetricFilter};
pub use histogram::{Histogram, LatencyMetrics, DEFAULT_HISTOGRAM_CAPACITY};
pub use hooks::{FnHook, HookId, MetricsHook, HOOK_TIMEOUT};
pub use snapshot::{BreakdownMetrics, ErrorMetrics, MetricsSnapshot, StreamingMetrics, TokenMetrics};
pub use stream::{MetricsStream, MetricsStreamBuilder, StreamSessionMetrics};
pub use subscription::{Subscription, DEFAULT_SUBSCRIPTION_BUFFER};

pub use crate::tokens::{CostBreakdown, CostCalculator, NullCostCalculator, StaticCostCalculator};
