//! The metrics event hub.

use super::aggregate::Aggregate;
use super::event::{MetricEvent, MetricFilter};
use super::histogram::DEFAULT_HISTOGRAM_CAPACITY;
use super::hooks::{self, HookId, MetricsHook};
use super::snapshot::{success_rate, BreakdownMetrics, MetricsSnapshot};
use super::subscription::{self, SubscriberMap, Subscription, DEFAULT_SUBSCRIPTION_BUFFER};
use crate::tokens::{CostCalculator, NullCostCalculator};
use crate::utils::sync;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime};
use tokio_util::sync::CancellationToken;

/// Tunables for a [`MetricsCollector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Samples kept by every latency / TTFT histogram.
    pub histogram_capacity: usize,
    /// Buffer used by [`MetricsCollector::subscribe_default`].
    pub subscription_buffer: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            histogram_capacity: DEFAULT_HISTOGRAM_CAPACITY,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

struct HubState {
    global: Arc<Aggregate>,
    providers: HashMap<String, Arc<Aggregate>>,
    models: HashMap<String, Arc<Aggregate>>,
    first_request_time: Option<SystemTime>,
    last_updated: Option<SystemTime>,
}

impl HubState {
    fn new(capacity: usize) -> Self {
        Self {
            global: Arc::new(Aggregate::new(capacity)),
            providers: HashMap::new(),
            models: HashMap::new(),
            first_request_time: None,
            last_updated: None,
        }
    }
}

/// Ingests [`MetricEvent`]s, keeps aggregate / per-provider / per-model counters and fans
/// events out to subscriptions and hooks.
///
/// Publishing never blocks: a subscriber whose buffer is full loses the event and its
/// overflow counter is bumped.
pub struct MetricsCollector {
    config: CollectorConfig,
    closed: AtomicBool,
    record_failures: AtomicU64,
    state: RwLock<HubState>,
    start_time: SystemTime,
    started: Instant,
    cost_calculator: Arc<dyn CostCalculator>,
    subscribers: Arc<SubscriberMap>,
    hooks: RwLock<Vec<(HookId, Arc<dyn MetricsHook>)>>,
    next_id: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_config(CollectorConfig::default())
    }

    pub fn with_config(config: CollectorConfig) -> Self {
        Self {
            state: RwLock::new(HubState::new(config.histogram_capacity)),
            config,
            closed: AtomicBool::new(false),
            record_failures: AtomicU64::new(0),
            start_time: SystemTime::now(),
            started: Instant::now(),
            cost_calculator: Arc::new(NullCostCalculator),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            hooks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_cost_calculator(mut self, calculator: Arc<dyn CostCalculator>) -> Self {
        self.cost_calculator = calculator;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Records one event.
    ///
    /// Fails with [`Error::Closed`] after [`close`](Self::close) and with
    /// [`Error::Cancelled`] when `ctx` is already cancelled; both bump
    /// [`record_failures`](Self::record_failures).
    pub async fn record(&self, ctx: &CancellationToken, event: MetricEvent) -> Result<()> {
        if self.is_closed() {
            self.record_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Closed);
        }
        if ctx.is_cancelled() {
            self.record_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Cancelled);
        }

        let (global, provider, model) = self.shards(&event);

        let cost = if event.counts_tokens() {
            Some(self.cost_calculator.calculate(
                &event.provider_name,
                &event.model_id,
                event.input_tokens,
                event.output_tokens,
            ))
        } else {
            None
        };

        global.apply(&event, cost.as_ref());
        provider.apply(&event, cost.as_ref());
        if let Some(model) = model {
            model.apply(&event, cost.as_ref());
        }

        subscription::publish(&self.subscribers, &event);

        let hooks: Vec<Arc<dyn MetricsHook>> = sync::read(&self.hooks)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        if !hooks.is_empty() {
            hooks::dispatch(hooks, ctx, &event).await;
        }
        Ok(())
    }

    /// Stamps timestamps and resolves (creating on first use) the shards for `event`.
    fn shards(&self, event: &MetricEvent) -> (Arc<Aggregate>, Arc<Aggregate>, Option<Arc<Aggregate>>) {
        let capacity = self.config.histogram_capacity;
        let mut state = sync::write(&self.state);
        if state.first_request_time.is_none() {
            state.first_request_time = Some(event.timestamp);
        }
        state.last_updated = Some(event.timestamp);

        let global = Arc::clone(&state.global);
        let provider = Arc::clone(
            state
                .providers
                .entry(event.provider_name.clone())
                .or_insert_with(|| Arc::new(Aggregate::new(capacity))),
        );
        let model = if event.model_id.is_empty() {
            None
        } else {
            Some(Arc::clone(
                state
                    .models
                    .entry(event.model_id.clone())
                    .or_insert_with(|| Arc::new(Aggregate::new(capacity))),
            ))
        };
        (global, provider, model)
    }

    /// Opens a bounded subscription. A zero `buffer` is treated as one.
    pub fn subscribe(&self, buffer: usize, filter: Option<MetricFilter>) -> Result<Subscription> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(subscription::new_subscription(
            id,
            buffer,
            filter,
            &self.subscribers,
        ))
    }

    pub fn subscribe_default(&self, filter: Option<MetricFilter>) -> Result<Subscription> {
        self.subscribe(self.config.subscription_buffer, filter)
    }

    pub fn subscriber_count(&self) -> usize {
        sync::read(&self.subscribers).len()
    }

    pub fn register_hook(&self, hook: Arc<dyn MetricsHook>) -> Result<HookId> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(hook = hook.name(), "metrics hook registered");
        sync::write(&self.hooks).push((id, hook));
        Ok(id)
    }

    pub fn unregister_hook(&self, id: HookId) -> bool {
        let mut hooks = sync::write(&self.hooks);
        let before = hooks.len();
        hooks.retain(|(h, _)| *h != id);
        hooks.len() < before
    }

    pub fn hook_count(&self) -> usize {
        sync::read(&self.hooks).len()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = sync::read(&self.state);
        let g = &state.global;
        let successful = g.successful_requests();
        let failed = g.failed_requests();

        MetricsSnapshot {
            total_requests: g.total_requests(),
            successful_requests: successful,
            failed_requests: failed,
            success_rate: success_rate(successful, failed),
            latency: g.latency().snapshot(),
            tokens: g.tokens(),
            errors: g.errors(),
            streaming: g.streaming(),
            provider_metrics: breakdowns(&state.providers),
            model_metrics: breakdowns(&state.models),
            uptime: self.started.elapsed(),
            start_time: self.start_time,
            first_request_time: state.first_request_time,
            last_updated: state.last_updated,
        }
    }

    pub fn provider_metrics(&self, provider: &str) -> Option<BreakdownMetrics> {
        let shard = sync::read(&self.state).providers.get(provider).cloned()?;
        Some(shard.breakdown(provider))
    }

    pub fn model_metrics(&self, model: &str) -> Option<BreakdownMetrics> {
        let shard = sync::read(&self.state).models.get(model).cloned()?;
        Some(shard.breakdown(model))
    }

    /// Drops every counter, shard and timestamp. Subscriptions and hooks are kept.
    pub fn reset(&self) {
        *sync::write(&self.state) = HubState::new(self.config.histogram_capacity);
        tracing::debug!("metrics collector reset");
    }

    /// Stops accepting events, closes every subscription channel and forgets all hooks.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = subscription::close_all(&self.subscribers);
        sync::write(&self.hooks).clear();
        tracing::debug!(subscriptions = closed, "metrics collector closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events rejected by `record` (closed hub or cancelled context).
    pub fn record_failures(&self) -> u64 {
        self.record_failures.load(Ordering::Relaxed)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("subscribers", &self.subscriber_count())
            .field("hooks", &self.hook_count())
            .finish()
    }
}

fn breakdowns(shards: &HashMap<String, Arc<Aggregate>>) -> HashMap<String, BreakdownMetrics> {
    shards
        .iter()
        .map(|(name, shard)| (name.clone(), shard.breakdown(name)))
        .collect()
}

static GLOBAL_COLLECTOR: once_cell::sync::Lazy<Arc<MetricsCollector>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Process-wide collector for callers that do not thread their own.
pub fn global_collector() -> Arc<MetricsCollector> {
    Arc::clone(&GLOBAL_COLLECTOR)
}
