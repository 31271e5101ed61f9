//! Providers composed from other providers.
//!
//! | Provider | Selection |
//! |----------|-----------|
//! | [`LoadBalancer`] | One child per call: round-robin, clock-random or smooth weighted |
//! | [`RacingProvider`] | All children in parallel, first successful stream wins |
//!
//! Both tag every chunk they forward with the child that served it and report
//! request / success / error events to a [`MetricsCollector`].

mod load_balancer;
mod racing;

pub use load_balancer::{LoadBalanceStrategy, LoadBalancer, LOADBALANCE_PROVIDER_KEY};
pub use racing::{RacingProvider, DEFAULT_RACE_TIMEOUT, RACING_WINNER_KEY};

use crate::metrics::{MetricEvent, MetricsCollector};
use crate::types::{BoxChatStream, ChatChunk, ChatStream};
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Forwards a stream, adding `key = value` to each chunk's metadata unless already present.
pub struct TaggedStream {
    inner: BoxChatStream,
    key: &'static str,
    value: String,
}

impl TaggedStream {
    pub fn new(inner: BoxChatStream, key: &'static str, value: impl Into<String>) -> Self {
        Self {
            inner,
            key,
            value: value.into(),
        }
    }

    pub fn boxed(self) -> BoxChatStream {
        Box::new(self)
    }
}

#[async_trait]
impl ChatStream for TaggedStream {
    async fn recv(&mut self) -> Result<Option<ChatChunk>> {
        let mut chunk = match self.inner.recv().await? {
            Some(c) => c,
            None => return Ok(None),
        };
        chunk.tag(self.key, self.value.clone());
        Ok(Some(chunk))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

async fn report(collector: &MetricsCollector, ctx: &CancellationToken, event: MetricEvent) {
    if let Err(e) = collector.record(ctx, event).await {
        tracing::debug!(error = %e, "virtual provider metric dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkStream;
    use serde_json::json;

    #[tokio::test]
    async fn test_tag_never_overwrites() {
        let chunks = vec![
            ChatChunk::text("1", "a").with_metadata("who", json!("upstream")),
            ChatChunk::done("1"),
        ];
        let mut s = TaggedStream::new(ChunkStream::from_chunks(chunks).boxed(), "who", "lb");
        let first = s.recv().await.unwrap().unwrap();
        assert_eq!(first.metadata["who"], "upstream");
        let second = s.recv().await.unwrap().unwrap();
        assert_eq!(second.metadata["who"], "lb");
        assert!(s.recv().await.unwrap().is_none());
        s.close().await.unwrap();
    }
}
