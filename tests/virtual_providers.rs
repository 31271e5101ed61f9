//! Integration tests for the load balancer and racing providers.

use ai_lib_gateway::metrics::MetricsCollector;
use ai_lib_gateway::provider::{ChatProvider, MockProvider, SharedProvider};
use ai_lib_gateway::types::{ChatRequest, ChatStream, MetadataExt};
use ai_lib_gateway::virtual_providers::{
    LoadBalanceStrategy, LoadBalancer, RacingProvider, LOADBALANCE_PROVIDER_KEY,
    RACING_WINNER_KEY,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_round_robin_spreads_calls_and_tags_chunks() {
    let children: Vec<Arc<MockProvider>> = ["a", "b", "c"]
        .iter()
        .map(|n| Arc::new(MockProvider::new(*n)))
        .collect();
    let pool: Vec<SharedProvider> = children
        .iter()
        .map(|c| Arc::clone(c) as SharedProvider)
        .collect();
    let collector = Arc::new(MetricsCollector::new());
    let lb = LoadBalancer::new("pool", pool)
        .unwrap()
        .with_strategy(LoadBalanceStrategy::RoundRobin)
        .with_collector(collector.clone());

    let ctx = CancellationToken::new();
    let mut served: HashMap<String, usize> = HashMap::new();
    for _ in 0..9 {
        let mut stream = lb
            .generate_chat_completion(&ctx, &ChatRequest::new("m"))
            .await
            .unwrap();
        while let Some(chunk) = stream.recv().await.unwrap() {
            let tag = chunk
                .metadata
                .get_str(LOADBALANCE_PROVIDER_KEY)
                .unwrap()
                .to_string();
            if !chunk.content().is_empty() {
                assert_eq!(chunk.content(), format!("Hello from {}", tag));
            }
            *served.entry(tag).or_insert(0) += 1;
        }
    }

    for child in &children {
        assert_eq!(child.calls(), 3);
    }
    assert_eq!(served.len(), 3);
    let pool_metrics = collector.provider_metrics("pool").unwrap();
    assert_eq!(pool_metrics.total_requests, 9);
    assert_eq!(pool_metrics.successful_requests, 9);
}

#[tokio::test]
async fn test_weighted_pool_honours_weights() {
    let heavy = Arc::new(MockProvider::new("heavy"));
    let light = Arc::new(MockProvider::new("light"));
    let lb = LoadBalancer::new(
        "weighted",
        vec![heavy.clone() as SharedProvider, light.clone() as SharedProvider],
    )
    .unwrap()
    .with_strategy(LoadBalanceStrategy::Weighted)
    .with_weights(vec![3, 1])
    .unwrap()
    .with_collector(Arc::new(MetricsCollector::new()));

    let ctx = CancellationToken::new();
    for _ in 0..8 {
        lb.generate_chat_completion(&ctx, &ChatRequest::new("m"))
            .await
            .unwrap();
    }
    assert_eq!(heavy.calls(), 6);
    assert_eq!(light.calls(), 2);
}

#[tokio::test]
async fn test_racing_behind_load_balancer() {
    let fast = Arc::new(MockProvider::new("fast").with_call_delay(Duration::from_millis(5)));
    let slow = Arc::new(MockProvider::new("slow").with_call_delay(Duration::from_millis(300)));
    let collector = Arc::new(MetricsCollector::new());
    let race: SharedProvider = Arc::new(
        RacingProvider::new(
            "race",
            vec![fast.clone() as SharedProvider, slow.clone() as SharedProvider],
        )
        .unwrap()
        .with_timeout(Duration::from_secs(2))
        .with_collector(collector.clone()),
    );
    let lb = LoadBalancer::new("front", vec![race])
        .unwrap()
        .with_collector(collector.clone());

    let ctx = CancellationToken::new();
    let mut stream = lb
        .generate_chat_completion(&ctx, &ChatRequest::new("m"))
        .await
        .unwrap();
    let chunk = stream.recv().await.unwrap().unwrap();
    assert_eq!(chunk.metadata.get_str(RACING_WINNER_KEY), Some("fast"));
    assert_eq!(chunk.metadata.get_str(LOADBALANCE_PROVIDER_KEY), Some("race"));
    assert_eq!(chunk.content(), "Hello from fast");

    assert_eq!(collector.provider_metrics("race").unwrap().successful_requests, 1);
    assert_eq!(collector.provider_metrics("front").unwrap().successful_requests, 1);
}
