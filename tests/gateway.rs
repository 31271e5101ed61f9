//! End-to-end tests for the gateway orchestrator.

use ai_lib_gateway::config::GatewayConfig;
use ai_lib_gateway::extensions::{
    set_enabled_for_request, ContentFilterExtension, Extension, ProviderErrorHandler,
    ProviderSelectionHook, RequestTagExtension, RouteRequest, RouteTable,
};
use ai_lib_gateway::gateway::{Gateway, PROVIDER_METADATA_KEY};
use ai_lib_gateway::interceptors::CacheInterceptor;
use ai_lib_gateway::metrics::{MetricEventType, MetricFilter, MetricsCollector};
use ai_lib_gateway::provider::{MockProvider, ModelInventory, SharedProvider};
use ai_lib_gateway::types::{ChatRequest, ChatStream, MetadataExt};
use ai_lib_gateway::Error;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Records provider errors and selections; optionally replaces errors.
#[derive(Default)]
struct Audit {
    errors: Mutex<Vec<(String, String)>>,
    selections: AtomicUsize,
    replace: bool,
}

impl Extension for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "records provider activity"
    }

    fn as_error_handler(&self) -> Option<&dyn ProviderErrorHandler> {
        Some(self)
    }

    fn as_selection_hook(&self) -> Option<&dyn ProviderSelectionHook> {
        Some(self)
    }
}

#[async_trait]
impl ProviderErrorHandler for Audit {
    async fn on_provider_error(
        &self,
        _ctx: &CancellationToken,
        _request: &ChatRequest,
        provider: &str,
        error: &Error,
    ) -> ai_lib_gateway::Result<()> {
        self.errors
            .lock()
            .unwrap()
            .push((provider.to_string(), error.to_string()));
        if self.replace {
            return Err(Error::hook("audit", "replaced"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderSelectionHook for Audit {
    async fn on_provider_selected(
        &self,
        _ctx: &CancellationToken,
        request: &mut ChatRequest,
        provider: &str,
    ) -> ai_lib_gateway::Result<()> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        request
            .metadata
            .insert("selected".to_string(), json!(provider));
        Ok(())
    }
}

fn collector() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new())
}

#[tokio::test]
async fn test_generate_runs_full_pipeline() {
    let mock = Arc::new(MockProvider::new("primary").with_text("pong"));
    let audit = Arc::new(Audit::default());
    let hub = collector();
    let gw = Gateway::builder()
        .with_collector(hub.clone())
        .with_provider(mock.clone())
        .with_extension(Arc::new(RequestTagExtension::new().with_tag("env", "test")))
        .with_extension(audit.clone())
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    let resp = gw
        .generate(&ctx, ChatRequest::new("primary/gpt").with_prompt("ping"))
        .await
        .unwrap();

    assert_eq!(resp.content, "pong");
    assert_eq!(resp.provider, "primary");
    assert!(resp.metadata.get_str(RequestTagExtension::REQUEST_ID_KEY).is_some());
    assert_eq!(resp.metadata.get_str("env"), Some("test"));
    assert_eq!(audit.selections.load(Ordering::SeqCst), 1);

    let seen = mock.last_request().unwrap();
    assert_eq!(seen.model, "gpt");
    assert_eq!(seen.metadata.get_str("selected"), Some("primary"));

    let snap = hub.snapshot();
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.successful_requests, 1);
    assert_eq!(snap.streaming.unwrap().successful_streams, 1);
    assert_eq!(hub.model_metrics("gpt").unwrap().total_requests, 1);
}

#[tokio::test]
async fn test_content_filter_blocks_even_when_disabled() {
    let mock = Arc::new(MockProvider::new("primary"));
    let filter = Arc::new(ContentFilterExtension::new(["forbidden"]).unwrap());
    let gw = Gateway::builder()
        .with_collector(collector())
        .with_provider(mock.clone())
        .with_extension(filter.clone())
        .build()
        .unwrap();

    let mut request = ChatRequest::new("m").with_prompt("this is FORBIDDEN text");
    set_enabled_for_request(&mut request.metadata, ContentFilterExtension::NAME, false);

    let ctx = CancellationToken::new();
    let err = gw.generate(&ctx, request).await.unwrap_err();
    assert!(matches!(err, Error::Hook { ref name, .. } if name == "content_filter"));
    assert_eq!(mock.calls(), 0);
    assert_eq!(filter.blocked_count(), 1);

    let mut table = RouteTable::new();
    gw.extensions().register_routes(&mut table).unwrap();
    let stats = table
        .dispatch(RouteRequest::new("GET", "/extensions/content_filter/stats"))
        .await;
    assert_eq!(stats.status, 200);
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(stats.body_str()).unwrap(),
        json!({"blocked": 1})
    );
}

#[tokio::test]
async fn test_provider_error_reaches_handlers_and_metrics() {
    let audit = Arc::new(Audit::default());
    let hub = collector();
    let gw = Gateway::builder()
        .with_collector(hub.clone())
        .with_provider(Arc::new(
            MockProvider::new("flaky").with_status_error("too many requests", 429),
        ))
        .with_extension(audit.clone())
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    let err = gw.generate(&ctx, ChatRequest::new("m")).await.unwrap_err();
    assert_eq!(err.status_code(), Some(429));

    let errors = audit.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "flaky");

    let snap = hub.snapshot();
    assert_eq!(snap.failed_requests, 1);
    assert_eq!(snap.errors.rate_limit_errors, 1);
    assert_eq!(snap.errors.by_status_code.get(&429), Some(&1));
}

#[tokio::test]
async fn test_error_handler_failure_replaces_error() {
    let audit = Arc::new(Audit {
        replace: true,
        ..Default::default()
    });
    let gw = Gateway::builder()
        .with_collector(collector())
        .with_provider(Arc::new(MockProvider::new("broken").with_error("boom")))
        .with_extension(audit)
        .build()
        .unwrap();

    let err = gw
        .generate(&CancellationToken::new(), ChatRequest::new("m"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Hook { ref message, .. } if message == "replaced"));
}

#[tokio::test]
async fn test_interceptors_wrap_generate() {
    let mock = Arc::new(MockProvider::new("primary"));
    let gw = Gateway::builder()
        .with_collector(collector())
        .with_provider(mock.clone())
        .with_interceptor(Arc::new(CacheInterceptor::in_memory(8)))
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    let req = ChatRequest::new("m").with_prompt("same");
    let a = gw.generate(&ctx, req.clone()).await.unwrap();
    let b = gw.generate(&ctx, req).await.unwrap();
    assert_eq!(a.content, b.content);
    assert_eq!(mock.calls(), 1);
    assert_eq!(gw.interceptors().names(), vec!["cache"]);
}

#[tokio::test]
async fn test_generate_stream_emits_stream_events() {
    let hub = collector();
    let mut ends = hub
        .subscribe(
            4,
            Some(MetricFilter::new().with_event_types([MetricEventType::StreamEnd])),
        )
        .unwrap();
    let gw = Gateway::builder()
        .with_collector(hub.clone())
        .with_provider(Arc::new(MockProvider::new("primary").with_text("streamed")))
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    let mut stream = gw
        .generate_stream(&ctx, ChatRequest::new("m").with_stream(true))
        .await
        .unwrap();
    let mut text = String::new();
    while let Some(chunk) = stream.recv().await.unwrap() {
        text.push_str(chunk.content());
    }
    assert_eq!(text, "streamed");
    assert!(stream.metrics().completed);

    let end = ends.try_recv().unwrap();
    assert_eq!(end.provider_name, "primary");
    assert_eq!(end.stream_session_id, stream.session_id());
}

#[tokio::test]
async fn test_metadata_selects_provider() {
    let a = Arc::new(MockProvider::new("a"));
    let b = Arc::new(MockProvider::new("b"));
    let gw = Gateway::builder()
        .with_collector(collector())
        .with_provider(a.clone())
        .with_provider(b.clone())
        .with_default_provider("a")
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    gw.generate(&ctx, ChatRequest::new("m")).await.unwrap();
    gw.generate(
        &ctx,
        ChatRequest::new("m").with_metadata(PROVIDER_METADATA_KEY, json!("b")),
    )
    .await
    .unwrap();
    assert_eq!((a.calls(), b.calls()), (1, 1));
}

#[tokio::test]
async fn test_config_builds_virtual_providers() {
    let config = GatewayConfig::from_yaml_str(
        r#"
default_provider: pool
providers:
  - name: a
    type: mock
    default_model: tuned
load_balancers:
  - name: pool
    providers: [a, b]
racing:
  - name: race
    providers: [a, b]
    timeout_ms: 1000
extensions:
  request_tag:
    config:
      tags:
        tier: gold
"#,
    )
    .unwrap();

    let a = Arc::new(MockProvider::new("a"));
    let b = Arc::new(MockProvider::new("b"));
    let gw = Gateway::builder()
        .with_collector(collector())
        .with_provider(a.clone() as SharedProvider)
        .with_provider(b.clone() as SharedProvider)
        .with_extension(Arc::new(RequestTagExtension::new()))
        .with_config(&config)
        .build()
        .unwrap();
    gw.initialize_extensions().await.unwrap();
    assert_eq!(gw.providers(), vec!["a", "b", "pool", "race"]);
    assert_eq!(a.default_model(), "tuned");

    let ctx = CancellationToken::new();
    for _ in 0..4 {
        let resp = gw.generate(&ctx, ChatRequest::new("m")).await.unwrap();
        assert_eq!(resp.metadata.get_str("tier"), Some("gold"));
    }
    assert_eq!((a.calls(), b.calls()), (2, 2));

    let health = gw.health_check_all(&ctx).await;
    assert_eq!(health.len(), 4);
    assert!(health.values().all(|r| r.is_ok()));

    b.set_healthy(false);
    let health = gw.health_check_all(&ctx).await;
    assert!(health["b"].is_err());
    assert!(health["pool"].is_ok());

    gw.shutdown(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_virtual_provider_requests_counted_once() {
    let config = GatewayConfig::from_yaml_str(
        "default_provider: pool\nload_balancers:\n  - name: pool\n    providers: [a, b]\n",
    )
    .unwrap();
    let hub = collector();
    let gw = Gateway::builder()
        .with_collector(Arc::clone(&hub))
        .with_provider(Arc::new(MockProvider::new("a")))
        .with_provider(Arc::new(MockProvider::new("b")))
        .with_config(&config)
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    for _ in 0..4 {
        gw.generate(&ctx, ChatRequest::new("m")).await.unwrap();
    }
    let snap = hub.snapshot();
    assert_eq!(snap.total_requests, 4);
    assert_eq!(snap.successful_requests, 4);
    let pool = hub.provider_metrics("pool").unwrap();
    assert_eq!(pool.total_requests, 4);
    assert_eq!(pool.successful_requests, 4);
}

#[tokio::test]
async fn test_virtual_provider_failure_counted_once() {
    let config = GatewayConfig::from_yaml_str(
        "default_provider: pool\nload_balancers:\n  - name: pool\n    providers: [down]\n",
    )
    .unwrap();
    let hub = collector();
    let gw = Gateway::builder()
        .with_collector(Arc::clone(&hub))
        .with_provider(Arc::new(MockProvider::new("down").with_status_error("overloaded", 503)))
        .with_config(&config)
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    gw.generate(&ctx, ChatRequest::new("m").with_metadata(PROVIDER_METADATA_KEY, json!("pool")))
        .await
        .unwrap_err();
    let snap = hub.snapshot();
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.failed_requests, 1);
}

#[tokio::test]
async fn test_cached_virtual_response_still_counted() {
    let config = GatewayConfig::from_yaml_str(
        "default_provider: pool\nload_balancers:\n  - name: pool\n    providers: [a]\n",
    )
    .unwrap();
    let hub = collector();
    let a = Arc::new(MockProvider::new("a"));
    let gw = Gateway::builder()
        .with_collector(Arc::clone(&hub))
        .with_provider(a.clone())
        .with_interceptor(Arc::new(CacheInterceptor::in_memory(8)))
        .with_config(&config)
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    let req = ChatRequest::new("m").with_prompt("same");
    gw.generate(&ctx, req.clone()).await.unwrap();
    gw.generate(&ctx, req).await.unwrap();
    assert_eq!(a.calls(), 1);
    let pool = hub.provider_metrics("pool").unwrap();
    assert_eq!(pool.total_requests, 2);
    assert_eq!(pool.successful_requests, 2);
}

#[tokio::test]
async fn test_config_with_unknown_member_fails() {
    let config = GatewayConfig::from_yaml_str(
        "load_balancers:\n  - name: pool\n    providers: [ghost]\n",
    )
    .unwrap();
    let err = Gateway::builder()
        .with_collector(collector())
        .with_config(&config)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::Configuration { .. }));
}
