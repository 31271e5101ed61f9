//! Request orchestration across providers, extensions, interceptors and metrics.
//!
//! ```text
//! request ─▶ before_generate ─▶ resolve provider ─▶ on_provider_selected
//!         ─▶ interceptors ─▶ provider stream ─▶ MetricsStream ─▶ collect
//!         ─▶ after_generate ─▶ response
//! ```
//!
//! A failure anywhere after provider selection is reported to `on_provider_error` handlers
//! and recorded as an error event before it is returned.
//!
//! Virtual providers record their own `request` and outcome events. The gateway records
//! those events for a virtual provider only when the call never reached it (an interceptor
//! short-circuited, or it cannot chat).

use crate::config::GatewayConfig;
use crate::extensions::{Extension, ExtensionConfig, ExtensionRegistry};
use crate::interceptors::{provider_fn, Interceptor, InterceptorChain, ProviderFn};
use crate::metrics::{global_collector, MetricEvent, MetricEventType, MetricsCollector, MetricsStream};
use crate::provider::{ModelRef, ProviderType, SharedProvider};
use crate::types::{ChatRequest, ChatResponse, MetadataExt};
use crate::utils::sync;
use crate::virtual_providers::{LoadBalancer, RacingProvider};
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Request metadata key naming the provider to use.
pub const PROVIDER_METADATA_KEY: &str = "provider";

pub struct GatewayBuilder {
    collector: Option<Arc<MetricsCollector>>,
    providers: Vec<SharedProvider>,
    default_provider: Option<String>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    extensions: Vec<Arc<dyn Extension>>,
    extension_configs: HashMap<String, ExtensionConfig>,
    emit_chunk_events: bool,
    config: Option<GatewayConfig>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            collector: None,
            providers: Vec::new(),
            default_provider: None,
            interceptors: Vec::new(),
            extensions: Vec::new(),
            extension_configs: HashMap::new(),
            emit_chunk_events: false,
            config: None,
        }
    }

    /// Defaults to [`global_collector`].
    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_provider(mut self, provider: SharedProvider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Appended after previously added interceptors; the first one is outermost.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn emit_chunk_events(mut self, enabled: bool) -> Self {
        self.emit_chunk_events = enabled;
        self
    }

    /// Applies a [`GatewayConfig`]. At `build` time provider entries are passed to the
    /// matching registered provider's [`Lifecycle::configure`](crate::provider::Lifecycle),
    /// then load balancers and racers are assembled from registered providers. Without an
    /// explicit collector, one is created from the `metrics` section.
    pub fn with_config(mut self, config: &GatewayConfig) -> Self {
        self.emit_chunk_events = config.metrics.emit_chunk_events;
        if self.default_provider.is_none() {
            self.default_provider = config.default_provider.clone();
        }
        self.extension_configs = config.extensions.clone();
        self.config = Some(config.clone());
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let collector = self
            .collector
            .or_else(|| {
                self.config.as_ref().map(|c| {
                    Arc::new(MetricsCollector::with_config(c.metrics.collector.clone()))
                })
            })
            .unwrap_or_else(global_collector);
        let mut providers: HashMap<String, SharedProvider> = HashMap::new();
        for p in self.providers {
            let name = p.name().to_string();
            if providers.insert(name.clone(), p).is_some() {
                return Err(Error::duplicate("provider", name));
            }
        }

        if let Some(config) = &self.config {
            for pc in &config.providers {
                match providers.get(&pc.name).and_then(|p| p.as_lifecycle()) {
                    Some(lifecycle) => lifecycle.configure(pc.clone())?,
                    None => tracing::warn!(
                        provider = %pc.name,
                        "provider config has no configurable provider, ignoring"
                    ),
                }
            }
            for lb in &config.load_balancers {
                let children = lookup(&providers, &lb.name, &lb.providers)?;
                let mut balancer = LoadBalancer::new(lb.name.clone(), children)?
                    .with_strategy(lb.strategy)
                    .with_collector(Arc::clone(&collector));
                if let Some(weights) = &lb.weights {
                    balancer = balancer.with_weights(weights.clone())?;
                }
                insert_unique(&mut providers, Arc::new(balancer))?;
            }
            for race in &config.racing {
                let children = lookup(&providers, &race.name, &race.providers)?;
                let racer = RacingProvider::new(race.name.clone(), children)?
                    .with_timeout(Duration::from_millis(race.timeout_ms))
                    .with_grace_period(Duration::from_millis(race.grace_period_ms))
                    .with_collector(Arc::clone(&collector));
                insert_unique(&mut providers, Arc::new(racer))?;
            }
        }

        if let Some(default) = &self.default_provider {
            if !providers.contains_key(default) {
                return Err(Error::configuration_with_context(
                    format!("default provider '{}' is not registered", default),
                    ErrorContext::new()
                        .with_field_path("default_provider")
                        .with_source("gateway"),
                ));
            }
        }

        let extensions = ExtensionRegistry::new();
        for ext in self.extensions {
            extensions.register(ext)?;
        }

        Ok(Gateway {
            providers: RwLock::new(providers),
            default_provider: RwLock::new(self.default_provider),
            extensions: Arc::new(extensions),
            extension_configs: self.extension_configs,
            interceptors: Arc::new(InterceptorChain::from_interceptors(self.interceptors)),
            collector,
            emit_chunk_events: self.emit_chunk_events,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(
    providers: &HashMap<String, SharedProvider>,
    owner: &str,
    names: &[String],
) -> Result<Vec<SharedProvider>> {
    names
        .iter()
        .map(|n| {
            providers.get(n).cloned().ok_or_else(|| {
                Error::configuration_with_context(
                    format!("'{}' references unknown provider '{}'", owner, n),
                    ErrorContext::new()
                        .with_field_path(format!("{}.providers", owner))
                        .with_source("gateway"),
                )
            })
        })
        .collect()
}

fn insert_unique(providers: &mut HashMap<String, SharedProvider>, p: SharedProvider) -> Result<()> {
    let name = p.name().to_string();
    if providers.contains_key(&name) {
        return Err(Error::duplicate("provider", name));
    }
    providers.insert(name, p);
    Ok(())
}

pub struct Gateway {
    providers: RwLock<HashMap<String, SharedProvider>>,
    default_provider: RwLock<Option<String>>,
    extensions: Arc<ExtensionRegistry>,
    extension_configs: HashMap<String, ExtensionConfig>,
    interceptors: Arc<InterceptorChain>,
    collector: Arc<MetricsCollector>,
    emit_chunk_events: bool,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn register_provider(&self, provider: SharedProvider) -> Result<()> {
        insert_unique(&mut sync::write(&self.providers), provider)
    }

    pub fn provider(&self, name: &str) -> Option<SharedProvider> {
        sync::read(&self.providers).get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = sync::read(&self.providers).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn set_default_provider(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !sync::read(&self.providers).contains_key(&name) {
            return Err(Error::validation(format!("unknown provider '{}'", name)));
        }
        *sync::write(&self.default_provider) = Some(name);
        Ok(())
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Initializes extensions with the configuration given to the builder.
    pub async fn initialize_extensions(&self) -> Result<()> {
        self.extensions.initialize(&self.extension_configs).await
    }

    pub async fn shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        self.extensions.shutdown(ctx).await
    }

    /// Picks the provider for `request`: the `provider` metadata key, then a
    /// `provider/model` prefix naming a registered provider (the prefix is stripped), then
    /// the default provider, then the only registered provider.
    pub fn resolve(&self, request: &mut ChatRequest) -> Result<SharedProvider> {
        let providers = sync::read(&self.providers);
        if let Some(name) = request.metadata.get_str(PROVIDER_METADATA_KEY) {
            return providers.get(name).cloned().ok_or_else(|| {
                Error::validation_with_context(
                    format!("unknown provider '{}'", name),
                    ErrorContext::new()
                        .with_field_path(format!("metadata.{}", PROVIDER_METADATA_KEY))
                        .with_source("gateway"),
                )
            });
        }
        if let Some(model_ref) = ModelRef::parse(&request.model) {
            if let Some(p) = providers.get(model_ref.provider()) {
                request.model = model_ref.model_name().to_string();
                return Ok(Arc::clone(p));
            }
        }
        if let Some(name) = sync::read(&self.default_provider).as_deref() {
            if let Some(p) = providers.get(name) {
                return Ok(Arc::clone(p));
            }
        }
        if providers.len() == 1 {
            if let Some(p) = providers.values().next() {
                return Ok(Arc::clone(p));
            }
        }
        Err(Error::validation_with_context(
            "no provider could be resolved for request",
            ErrorContext::new()
                .with_field_path("model")
                .with_details(format!("model '{}'", request.model))
                .with_source("gateway"),
        ))
    }

    /// Hooks, resolution and the `request` event shared by both entry points.
    async fn prepare(
        &self,
        ctx: &CancellationToken,
        request: &mut ChatRequest,
    ) -> Result<SharedProvider> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.extensions.run_before_generate(ctx, request).await?;
        let provider = self.resolve(request)?;
        self.extensions
            .run_provider_selected(ctx, request, provider.name())
            .await?;
        if !reports_itself(&provider) {
            self.record(ctx, request_event(&provider, request)).await;
        }
        tracing::debug!(provider = provider.name(), model = %request.model, "provider selected");
        Ok(provider)
    }

    pub async fn generate(
        &self,
        ctx: &CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatResponse> {
        let mut request = request;
        let provider = self.prepare(ctx, &mut request).await?;
        let started = Instant::now();

        let invoked = Arc::new(AtomicBool::new(false));
        let terminal = self.terminal(Arc::clone(&provider), Arc::clone(&invoked));
        let result = self
            .interceptors
            .execute(ctx.clone(), request.clone(), terminal)
            .await;

        let record_outcome = self
            .settle_request_event(ctx, &request, &provider, invoked.load(Ordering::SeqCst))
            .await;
        match result {
            Ok(mut response) => {
                if record_outcome {
                    self.record(ctx, success_event(&provider, &request, started))
                        .await;
                }
                self.extensions
                    .run_after_generate(ctx, &request, &mut response)
                    .await?;
                Ok(response)
            }
            Err(e) => Err(self
                .fail(ctx, &request, &provider, started, e, record_outcome)
                .await),
        }
    }

    /// Same hooks as [`generate`](Self::generate) without interceptors or `after_generate`.
    /// The returned stream emits the `stream_*` events as it is read.
    pub async fn generate_stream(
        &self,
        ctx: &CancellationToken,
        request: ChatRequest,
    ) -> Result<MetricsStream> {
        let mut request = request;
        let provider = self.prepare(ctx, &mut request).await?;
        let started = Instant::now();

        let (opened, invoked) = match provider.as_chat() {
            Some(chat) => (chat.generate_chat_completion(ctx, &request).await, true),
            None => (
                Err(Error::Incompatible {
                    provider: provider.name().to_string(),
                }),
                false,
            ),
        };
        let record_outcome = self
            .settle_request_event(ctx, &request, &provider, invoked)
            .await;
        match opened {
            Ok(stream) => {
                if record_outcome {
                    self.record(ctx, success_event(&provider, &request, started))
                        .await;
                }
                MetricsStream::builder()
                    .stream(stream)
                    .collector(Arc::clone(&self.collector))
                    .provider(provider.name())
                    .provider_type(provider.provider_type().id())
                    .model(request.model.clone())
                    .emit_chunk_events(self.emit_chunk_events)
                    .context(ctx.clone())
                    .build()
            }
            Err(e) => Err(self
                .fail(ctx, &request, &provider, started, e, record_outcome)
                .await),
        }
    }

    /// Returns whether the gateway owns the outcome event of this call. For a virtual
    /// provider the call never reached, the deferred `request` event is recorded here.
    async fn settle_request_event(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
        provider: &SharedProvider,
        invoked: bool,
    ) -> bool {
        if !reports_itself(provider) {
            return true;
        }
        if invoked {
            return false;
        }
        self.record(ctx, request_event(provider, request)).await;
        true
    }

    /// Health-checks every provider that supports it, keyed by provider name.
    pub async fn health_check_all(&self, ctx: &CancellationToken) -> HashMap<String, Result<()>> {
        let providers: Vec<SharedProvider> = sync::read(&self.providers).values().cloned().collect();
        let mut results = HashMap::new();
        for p in providers {
            let Some(checker) = p.as_health_checker() else {
                continue;
            };
            let started = Instant::now();
            let outcome = checker.health_check(ctx).await;
            let mut event = MetricEvent::new(MetricEventType::HealthCheck, p.name())
                .with_provider_type(p.provider_type().id())
                .with_latency(started.elapsed())
                .with_metadata("healthy", outcome.is_ok());
            if let Err(e) = &outcome {
                tracing::warn!(provider = p.name(), error = %e, "health check failed");
                event = event.with_error_message(e.to_string());
            }
            self.record(ctx, event).await;
            results.insert(p.name().to_string(), outcome);
        }
        results
    }

    fn terminal(&self, provider: SharedProvider, invoked: Arc<AtomicBool>) -> ProviderFn {
        let collector = Arc::clone(&self.collector);
        let emit_chunk_events = self.emit_chunk_events;
        provider_fn(move |ctx: CancellationToken, request: ChatRequest| {
            let provider = Arc::clone(&provider);
            let collector = Arc::clone(&collector);
            let invoked = Arc::clone(&invoked);
            async move {
                let chat = provider.as_chat().ok_or_else(|| Error::Incompatible {
                    provider: provider.name().to_string(),
                })?;
                invoked.store(true, Ordering::SeqCst);
                let inner = chat.generate_chat_completion(&ctx, &request).await?;
                let mut stream = MetricsStream::builder()
                    .stream(inner)
                    .collector(collector)
                    .provider(provider.name())
                    .provider_type(provider.provider_type().id())
                    .model(request.model.clone())
                    .emit_chunk_events(emit_chunk_events)
                    .context(ctx.clone())
                    .build()?;
                ChatResponse::collect(&mut stream, request.model.clone(), provider.name()).await
            }
        })
    }

    /// Records the failure, runs error handlers and returns the error to surface. A handler
    /// error replaces the original.
    async fn fail(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
        provider: &SharedProvider,
        started: Instant,
        error: Error,
        record: bool,
    ) -> Error {
        tracing::warn!(provider = provider.name(), model = %request.model, error = %error, "generation failed");
        if record {
            self.record(ctx, failure_event(provider, request, started, &error))
                .await;
        }
        match self
            .extensions
            .run_provider_error(ctx, request, provider.name(), &error)
            .await
        {
            Ok(()) => error,
            Err(hook_error) => hook_error,
        }
    }

    async fn record(&self, ctx: &CancellationToken, event: MetricEvent) {
        if let Err(e) = self.collector.record(ctx, event).await {
            tracing::debug!(error = %e, "metric event dropped");
        }
    }
}

fn reports_itself(provider: &SharedProvider) -> bool {
    provider.provider_type() == ProviderType::Virtual
}

fn request_event(provider: &SharedProvider, request: &ChatRequest) -> MetricEvent {
    MetricEvent::request(provider.name())
        .with_provider_type(provider.provider_type().id())
        .with_model(request.model.clone())
}

fn success_event(provider: &SharedProvider, request: &ChatRequest, started: Instant) -> MetricEvent {
    MetricEvent::success(provider.name())
        .with_provider_type(provider.provider_type().id())
        .with_model(request.model.clone())
        .with_latency(started.elapsed())
}

fn failure_event(
    provider: &SharedProvider,
    request: &ChatRequest,
    started: Instant,
    error: &Error,
) -> MetricEvent {
    let event_type = match (error, error.status_code()) {
        (Error::Timeout { .. }, _) => MetricEventType::Timeout,
        (_, Some(429)) => MetricEventType::RateLimit,
        _ => MetricEventType::Error,
    };
    let mut event = MetricEvent::new(event_type, provider.name())
        .with_provider_type(provider.provider_type().id())
        .with_model(request.model.clone())
        .with_latency(started.elapsed())
        .with_error_type("provider_error")
        .with_error_message(error.to_string());
    if let Some(status) = error.status_code() {
        event = event.with_status_code(status);
    }
    event
}
