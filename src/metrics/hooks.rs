//! Metrics hooks: advisory callbacks invoked for every recorded event.
//!
//! Each call runs on its own task and is abandoned after [`HOOK_TIMEOUT`]. A hook that
//! panics or overruns never affects the outcome of `record`; long-running side effects
//! belong on a [`Subscription`](super::Subscription) instead.

use super::event::{MetricEvent, MetricFilter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound for a single hook invocation.
pub const HOOK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub(crate) u64);

#[async_trait]
pub trait MetricsHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, ctx: &CancellationToken, event: &MetricEvent);

    /// Events that do not match are never delivered. `None` receives everything.
    fn filter(&self) -> Option<&MetricFilter> {
        None
    }
}

/// Hook backed by a synchronous closure.
pub struct FnHook<F> {
    name: String,
    filter: Option<MetricFilter>,
    func: F,
}

impl<F> FnHook<F>
where
    F: Fn(&MetricEvent) + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            filter: None,
            func,
        }
    }

    pub fn with_filter(mut self, filter: MetricFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[async_trait]
impl<F> MetricsHook for FnHook<F>
where
    F: Fn(&MetricEvent) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, _ctx: &CancellationToken, event: &MetricEvent) {
        (self.func)(event)
    }

    fn filter(&self) -> Option<&MetricFilter> {
        self.filter.as_ref()
    }
}

/// Runs `hooks` one after another, each bounded by [`HOOK_TIMEOUT`].
pub(crate) async fn dispatch(
    hooks: Vec<Arc<dyn MetricsHook>>,
    ctx: &CancellationToken,
    event: &MetricEvent,
) {
    for hook in hooks {
        if ctx.is_cancelled() {
            break;
        }
        if let Some(filter) = hook.filter() {
            if !filter.matches(event) {
                continue;
            }
        }

        let name = hook.name().to_string();
        let task_ctx = ctx.clone();
        let task_event = event.clone();
        let mut handle =
            tokio::spawn(async move { hook.on_event(&task_ctx, &task_event).await });

        match tokio::time::timeout(HOOK_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(hook = %name, error = %e, "metrics hook panicked");
            }
            Err(_) => {
                handle.abort();
                tracing::debug!(hook = %name, "metrics hook timed out");
            }
        }
    }
}
