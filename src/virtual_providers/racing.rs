//! Racing virtual provider: every child is asked, the first stream wins.

use super::{report, TaggedStream};
use crate::metrics::{global_collector, MetricEvent, MetricEventType, MetricsCollector};
use crate::provider::{
    ChatProvider, HealthChecker, MetricsReporter, Provider, ProviderMetrics, ProviderType,
    SharedProvider,
};
use crate::types::{BoxChatStream, ChatRequest};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Chunk metadata key naming the child whose stream won.
pub const RACING_WINNER_KEY: &str = "racing_winner";

pub const DEFAULT_RACE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fans each call out to all chat-capable children.
///
/// The first child to return a stream wins and the others are cancelled. If no child has
/// answered when `timeout` expires, answers are still accepted for `grace_period`; after
/// that the race fails with [`Error::Timeout`].
///
/// Each race records one `request` event and exactly one outcome: `success` (with
/// `late = true` when won during the grace period), `timeout`, or `error`.
pub struct RacingProvider {
    name: String,
    description: String,
    children: Vec<SharedProvider>,
    timeout: Duration,
    grace_period: Duration,
    collector: Arc<MetricsCollector>,
}

impl RacingProvider {
    pub fn new(name: impl Into<String>, children: Vec<SharedProvider>) -> Result<Self> {
        let name = name.into();
        if children.is_empty() {
            return Err(Error::validation_with_context(
                "racing provider needs at least one provider",
                ErrorContext::new()
                    .with_field_path("providers")
                    .with_source(name.clone()),
            ));
        }
        Ok(Self {
            description: format!("races {} providers", children.len()),
            name,
            children,
            timeout: DEFAULT_RACE_TIMEOUT,
            grace_period: Duration::ZERO,
            collector: global_collector(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn children(&self) -> &[SharedProvider] {
        &self.children
    }

    fn event(&self, event: MetricEvent, request: &ChatRequest) -> MetricEvent {
        event
            .with_provider_type(ProviderType::Virtual.id())
            .with_model(request.model.clone())
    }
}

enum Outcome {
    Won {
        index: usize,
        stream: BoxChatStream,
        late: bool,
    },
    AllFailed(Option<Error>),
    TimedOut,
    Cancelled,
}

impl Provider for RacingProvider {
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

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }

    fn as_metrics_reporter(&self) -> Option<&dyn MetricsReporter> {
        Some(self)
    }
}

#[async_trait]
impl ChatProvider for RacingProvider {
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

        let mut tokens = Vec::with_capacity(self.children.len());
        let mut racers = FuturesUnordered::new();
        for (index, child) in self.children.iter().enumerate() {
            let Some(chat) = child.as_chat() else {
                continue;
            };
            let token = ctx.child_token();
            tokens.push((index, token.clone()));
            racers.push(async move { (index, chat.generate_chat_completion(&token, request).await) });
        }
        if racers.is_empty() {
            report(
                &self.collector,
                ctx,
                self.event(
                    MetricEvent::error(&self.name, "no chat-capable providers")
                        .with_error_type("provider_incompatible"),
                    request,
                ),
            )
            .await;
            return Err(Error::Incompatible {
                provider: self.name.clone(),
            });
        }

        let timeout_at = started + self.timeout;
        let grace_end = timeout_at + self.grace_period;
        let mut in_grace = false;
        let mut last_error = None;
        let outcome = loop {
            let deadline = if in_grace { grace_end } else { timeout_at };
            tokio::select! {
                _ = ctx.cancelled() => break Outcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    if in_grace || self.grace_period.is_zero() {
                        break Outcome::TimedOut;
                    }
                    in_grace = true;
                    tracing::debug!(provider = %self.name, "race timeout reached, entering grace period");
                }
                next = racers.next() => match next {
                    Some((index, Ok(stream))) => break Outcome::Won { index, stream, late: in_grace },
                    Some((index, Err(e))) => {
                        tracing::debug!(provider = %self.name, child = self.children[index].name(), error = %e, "racer failed");
                        last_error = Some(e);
                    }
                    None => break Outcome::AllFailed(last_error.take()),
                },
            }
        };

        let winner = match &outcome {
            Outcome::Won { index, .. } => Some(*index),
            _ => None,
        };
        for (index, token) in &tokens {
            if Some(*index) != winner {
                token.cancel();
            }
        }
        drop(racers);

        match outcome {
            Outcome::Won {
                index,
                stream,
                late,
            } => {
                let winner_name = self.children[index].name().to_string();
                tracing::debug!(provider = %self.name, winner = %winner_name, late, "race won");
                report(
                    &self.collector,
                    ctx,
                    self.event(
                        MetricEvent::success(&self.name)
                            .with_latency(started.elapsed())
                            .with_metadata(RACING_WINNER_KEY, winner_name.clone())
                            .with_metadata("late", late),
                        request,
                    ),
                )
                .await;
                Ok(TaggedStream::new(stream, RACING_WINNER_KEY, winner_name).boxed())
            }
            Outcome::Cancelled => Err(Error::Cancelled),
            Outcome::TimedOut => {
                let after = self.timeout + self.grace_period;
                report(
                    &self.collector,
                    ctx,
                    self.event(
                        MetricEvent::new(MetricEventType::Timeout, &self.name)
                            .with_latency(started.elapsed())
                            .with_error_type("timeout")
                            .with_error_message("race timed out")
                            .with_metadata("grace_period_ms", self.grace_period.as_millis() as u64),
                        request,
                    ),
                )
                .await;
                Err(Error::Timeout {
                    operation: format!("race '{}'", self.name),
                    after,
                })
            }
            Outcome::AllFailed(last) => {
                let (message, status) = match &last {
                    Some(e) => (e.to_string(), e.status_code()),
                    None => ("no provider answered".to_string(), None),
                };
                let mut event = MetricEvent::error(&self.name, message.clone())
                    .with_error_type("provider_error");
                if let Some(s) = status {
                    event = event.with_status_code(s);
                }
                report(&self.collector, ctx, self.event(event, request)).await;
                Err(Error::Provider {
                    provider: self.name.clone(),
                    message: format!("all racing providers failed: {}", message),
                    status,
                    payload: None,
                })
            }
        }
    }
}

#[async_trait]
impl HealthChecker for RacingProvider {
    async fn health_check(&self, ctx: &CancellationToken) -> Result<()> {
        let mut last_error: Option<Error> = None;
        for child in &self.children {
            if let Some(checker) = child.as_health_checker() {
                match checker.health_check(ctx).await {
                    Ok(()) => return Ok(()),
                    Err(e) => last_error = Some(e),
                }
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

impl MetricsReporter for RacingProvider {
    fn metrics(&self) -> ProviderMetrics {
        let mut total = ProviderMetrics::default();
        for reporter in self.children.iter().filter_map(|c| c.as_metrics_reporter()) {
            total.merge(&reporter.metrics());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricFilter;
    use crate::provider::MockProvider;
    use crate::types::ChatResponse;

    fn racer(children: Vec<MockProvider>) -> RacingProvider {
        let shared = children
            .into_iter()
            .map(|c| Arc::new(c) as SharedProvider)
            .collect();
        RacingProvider::new("race", shared)
            .unwrap()
            .with_collector(Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn test_fastest_wins_and_is_tagged() {
        let race = racer(vec![
            MockProvider::new("slow").with_call_delay(Duration::from_millis(300)),
            MockProvider::new("fast").with_call_delay(Duration::from_millis(10)),
        ]);
        let mut s = race
            .generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .unwrap();
        let resp = ChatResponse::collect(&mut *s, "m", "race").await.unwrap();
        assert_eq!(resp.content, "Hello from fast");
        assert_eq!(resp.metadata[RACING_WINNER_KEY], "fast");
    }

    #[tokio::test]
    async fn test_errors_are_skipped() {
        let race = racer(vec![
            MockProvider::new("broken").with_error("boom"),
            MockProvider::new("ok").with_call_delay(Duration::from_millis(20)),
        ]);
        let mut s = race
            .generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .unwrap();
        let chunk = s.recv().await.unwrap().unwrap();
        assert_eq!(chunk.metadata[RACING_WINNER_KEY], "ok");
    }

    #[tokio::test]
    async fn test_all_failed_keeps_status() {
        let race = racer(vec![
            MockProvider::new("a").with_status_error("overloaded", 503),
            MockProvider::new("b").with_status_error("overloaded", 503),
        ]);
        let err = race
            .generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("all racing providers failed"));
    }

    #[tokio::test]
    async fn test_timeout_without_grace() {
        let race = racer(vec![MockProvider::new("slow").with_call_delay(Duration::from_secs(5))])
            .with_timeout(Duration::from_millis(30));
        let err = race
            .generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_grace_period_accepts_late_winner() {
        let collector = Arc::new(MetricsCollector::new());
        let race = RacingProvider::new(
            "race",
            vec![Arc::new(MockProvider::new("late").with_call_delay(Duration::from_millis(60)))
                as SharedProvider],
        )
        .unwrap()
        .with_timeout(Duration::from_millis(20))
        .with_grace_period(Duration::from_millis(500))
        .with_collector(Arc::clone(&collector));

        let mut s = race
            .generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .unwrap();
        assert!(s.recv().await.unwrap().is_some());
        let snap = collector.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 0);
        assert_eq!(snap.errors.timeout_errors, 0);
    }

    #[tokio::test]
    async fn test_late_win_is_flagged_on_success_event() {
        let collector = Arc::new(MetricsCollector::new());
        let mut successes = collector
            .subscribe(
                4,
                Some(MetricFilter::new().with_event_types([MetricEventType::Success])),
            )
            .unwrap();
        let race = RacingProvider::new(
            "race",
            vec![Arc::new(MockProvider::new("late").with_call_delay(Duration::from_millis(80)))
                as SharedProvider],
        )
        .unwrap()
        .with_timeout(Duration::from_millis(20))
        .with_grace_period(Duration::from_millis(200))
        .with_collector(Arc::clone(&collector));

        race.generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .unwrap();
        let ev = successes.try_recv().unwrap();
        assert_eq!(ev.metadata["late"], true);
        assert_eq!(ev.metadata[RACING_WINNER_KEY], "late");
    }

    #[tokio::test]
    async fn test_expired_grace_records_single_failure() {
        let collector = Arc::new(MetricsCollector::new());
        let race = RacingProvider::new(
            "race",
            vec![Arc::new(MockProvider::new("slow").with_call_delay(Duration::from_secs(5)))
                as SharedProvider],
        )
        .unwrap()
        .with_timeout(Duration::from_millis(20))
        .with_grace_period(Duration::from_millis(30))
        .with_collector(Arc::clone(&collector));

        let err = race
            .generate_chat_completion(&CancellationToken::new(), &ChatRequest::new("m"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Timeout { .. }));
        let snap = collector.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.successful_requests, 0);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.errors.timeout_errors, 1);
    }
}
