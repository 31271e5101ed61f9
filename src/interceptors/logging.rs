//! Tracing around each provider call.

use super::{Interceptor, Next};
use crate::types::{ChatRequest, ChatResponse};
use crate::Result;
use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct LoggingInterceptor {
    name: String,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::named("logging")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn intercept(
        &self,
        ctx: CancellationToken,
        request: ChatRequest,
        next: Next,
    ) -> Result<ChatResponse> {
        let model = request.model.clone();
        let started = Instant::now();
        tracing::debug!(model = %model, messages = request.messages.len(), "chat request");

        let result = next.run(ctx, request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(resp) => tracing::info!(
                model = %model,
                provider = %resp.provider,
                elapsed_ms,
                "chat request completed"
            ),
            Err(e) => tracing::warn!(model = %model, elapsed_ms, error = %e, "chat request failed"),
        }
        result
    }
}
