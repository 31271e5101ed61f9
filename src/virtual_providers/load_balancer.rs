//! Load-balancing virtual provider.

use super::{report, TaggedStream};
use crate::metrics::{global_collector, MetricEvent, MetricsCollector};
use crate::provider::{
    ChatProvider, HealthChecker, MetricsReporter, ModelInfo, ModelInventory, Provider,
    ProviderMetrics, ProviderType, SharedProvider,
};
use crate::types::{BoxChatStream, ChatRequest};
use crate::utils::sync;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Chunk metadata key naming the child that served the chunk.
pub const LOADBALANCE_PROVIDER_KEY: &str = "loadbalance_provider";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

impl LoadBalanceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends each call to one child provider.
///
/// Selection is pure and ignores child health; a failing child surfaces through the error
/// of the call that picked it.
pub struct LoadBalancer {
    name: String,
    description: String,
    strategy: LoadBalanceStrategy,
    children: Vec<SharedProvider>,
    weights: Vec<u32>,
    next: AtomicUsize,
    current_weights: Mutex<Vec<i64>>,
    collector: Arc<MetricsCollector>,
}

impl LoadBalancer {
    pub fn new(name: impl Into<String>, children: Vec<SharedProvider>) -> Result<Self> {
        let name = name.into();
        if children.is_empty() {
            return Err(Error::validation_with_context(
                "load balancer needs at least one provider",
                ErrorContext::new()
                    .with_field_path("providers")
                    .with_source(name.clone()),
            ));
        }
        let n = children.len();
        Ok(Self {
            description: format!("load balancer over {} providers", n),
            name,
            strategy: LoadBalanceStrategy::default(),
            children,
            weights: vec![1; n],
            next: AtomicUsize::new(0),
            current_weights: Mutex::new(vec![0; n]),
            collector: global_collector(),
        })
    }

    pub fn with_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Per-child weights for [`LoadBalanceStrategy::Weighted`], in child order.
    pub fn with_weights(mut self, weights: Vec<u32>) -> Result<Self> {
        if weights.len() != self.children.len() || weights.iter().all(|w| *w == 0) {
            return Err(Error::validation_with_context(
                "weights must match the provider list and not all be zero",
                ErrorContext::new()
                    .with_field_path("weights")
                    .with_details(format!(
                        "{} weights for {} providers",
                        weights.len(),
                        self.children.len()
                    ))
                    .with_source(self.name.clone()),
            ));
        }
        self.weights = weights;
        self
            .current_weights
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter_mut()
            .for_each(|w| *w = 0);
        Ok(self)
    }

    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    pub fn children(&self) -> &[SharedProvider] {
        &self.children
    }

    /// Picks the child for the next call.
    pub fn select(&self) -> SharedProvider {
        let idx = match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.children.len()
            }
            LoadBalanceStrategy::Random => {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_nanos() as usize)
                    .unwrap_or_default();
                nanos % self.children.len()
            }
            LoadBalanceStrategy::Weighted => self.select_weighted(),
        };
        Arc::clone(&self.children[idx])
    }

    /// Smooth weighted round-robin: every pick adds each weight to its running score, takes
    /// the highest score and subtracts the weight total from it.
    fn select_weighted(&self) -> usize {
        let mut current = sync::lock(&self.current_weights);
        let total: i64 = self.weights.iter().map(|w| i64::from(*w)).sum();
        let mut best = 0;
        for (i, w) in self.weights.iter().enumerate() {
            current[i] += i64::from(*w);
            if current[i] > current[best] {
                best = i;
            }
        }
        current[best] -= total;
        best
    }

    fn event(&self, event: MetricEvent, request: &ChatRequest) -> MetricEvent {
        event
            .with_provider_type(ProviderType::Virtual.id())
            .with_model(request.model.clone())
    }
}

impl Provider for LoadBalancer {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Virtual
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn as_chat(&self) -> Option<&dyn ChatProvider> {
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
impl ChatProvider for LoadBalancer {
    async fn generate_chat_completion(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<BoxChatStream> {
        let started = Instant::now();
        report(
            &self.collector,
            ctx,
            self.event(MetricEvent::request(&self.name), request),
        )
        .await;

        let child = self.select();
        let child_name = child.name().to_string();
        let Some(chat) = child.as_chat() else {
            report(
                &self.collector,
                ctx,
                self.event(
                    MetricEvent::error(&self.name, format!("provider '{}' is not chat-capable", child_name))
                        .with_error_type("provider_incompatible")
                        .with_metadata("selected_provider", child_name.clone()),
                    request,
                ),
            )
            .await;
            return Err(Error::Incompatible {
                provider: child_name,
            });
        };

        tracing::debug!(
            provider = %self.name,
            selected = %child_name,
            strategy = %self.strategy,
            "load balancer selected provider"
        );
        match chat.generate_chat_completion(ctx, request).await {
            Ok(stream) => {
                report(
                    &self.collector,
                    ctx,
                    self.event(
                        MetricEvent::success(&self.name)
                            .with_latency(started.elapsed())
                            .with_metadata("selected_provider", child_name.clone())
                            .with_metadata("strategy", self.strategy.as_str()),
                        request,
                    ),
                )
                .await;
                Ok(TaggedStream::new(stream, LOADBALANCE_PROVIDER_KEY, child_name).boxed())
            }
            Err(e) => {
                let mut event = MetricEvent::error(&self.name, e.to_string())
                    .with_error_type("provider_error")
                    .with_metadata("selected_provider", child_name.clone());
                if let Some(status) = e.status_code() {
                    event = event.with_status_code(status);
                }
                report(&self.collector, ctx, self.event(event, request)).await;
                tracing::warn!(provider = %self.name, selected = %child_name, error = %e, "child provider failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl HealthChecker for LoadBalancer {
    /// Healthy when any health-checkable child is healthy.
    async fn health_check(&self, ctx: &CancellationToken) -> Result<()> {
        let mut last_error: Option<Error> = None;
        for child in &self.children {
            let Some(checker) = child.as_health_checker() else {
                continue;
            };
            match checker.health_check(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no health-checkable providers".to_string());
        Err(Error::provider(
            &self.name,
            format!("all providers unhealthy: {}", cause),
        ))
    }
}

impl MetricsReporter for LoadBalancer {
    fn metrics(&self) -> ProviderMetrics {
        let mut total = ProviderMetrics::default();
        for reporter in self.children.iter().filter_map(|c| c.as_metrics_reporter()) {
            total.merge(&reporter.metrics());
        }
        total
    }
}

#[async_trait]
impl ModelInventory for LoadBalancer {
    /// Union of the children's models, first occurrence wins.
    async fn list_models(&self, ctx: &CancellationToken) -> Result<Vec<ModelInfo>> {
        let mut seen = HashSet::new();
        let mut models = Vec::new();
        for inventory in self.children.iter().filter_map(|c| c.as_inventory()) {
            for m in inventory.list_models(ctx).await? {
                if seen.insert(m.id.clone()) {
                    models.push(m);
                }
            }
        }
        Ok(models)
    }

    fn default_model(&self) -> String {
        self.children
            .iter()
            .find_map(|c| c.as_inventory().map(|i| i.default_model()))
            .unwrap_or_default()
    }
}
