//! Extensions shipped with the gateway.

use super::base::{
    AfterGenerateHook, BeforeGenerateHook, Extension, Initializable, PriorityProvider,
    RouteProvider,
};
use super::request_config::RequestExtensionConfig;
use super::routes::{handler_fn, RouteRegistrar, RouteResponse};
use crate::types::{ChatRequest, ChatResponse, Metadata, MetadataExt};
use crate::utils::sync;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Rejects requests whose text matches any configured pattern.
///
/// Security-critical: a request cannot switch it off through `extension_config`.
/// Patterns come from the constructor and from the `patterns` list of its init config.
pub struct ContentFilterExtension {
    patterns: RwLock<Vec<Regex>>,
    blocked: Arc<AtomicU64>,
}

impl ContentFilterExtension {
    pub const NAME: &'static str = "content_filter";

    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| compile(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns: RwLock::new(compiled),
            blocked: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn pattern_count(&self) -> usize {
        sync::read(&self.patterns).len()
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn first_match(&self, request: &ChatRequest) -> Option<String> {
        let patterns = sync::read(&self.patterns);
        request.text_parts().find_map(|text| {
            patterns
                .iter()
                .find(|re| re.is_match(text))
                .map(|re| re.as_str().to_string())
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            Error::validation_with_context(
                format!("invalid content filter pattern: {}", e),
                ErrorContext::new()
                    .with_field_path("patterns")
                    .with_details(pattern.to_string())
                    .with_source(ContentFilterExtension::NAME),
            )
        })
}

impl Extension for ContentFilterExtension {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "blocks prompts matching configured patterns"
    }

    fn is_security_critical(&self) -> bool {
        true
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }

    fn as_before_generate(&self) -> Option<&dyn BeforeGenerateHook> {
        Some(self)
    }

    fn as_priority_provider(&self) -> Option<&dyn PriorityProvider> {
        Some(self)
    }

    fn as_route_provider(&self) -> Option<&dyn RouteProvider> {
        Some(self)
    }
}

#[async_trait]
impl Initializable for ContentFilterExtension {
    async fn initialize(&self, config: &Metadata) -> Result<()> {
        let Some(list) = config.get_list("patterns") else {
            return Ok(());
        };
        let mut added = Vec::with_capacity(list.len());
        for item in list {
            let Some(p) = item.as_str() else {
                return Err(Error::configuration_with_context(
                    "content filter patterns must be strings",
                    ErrorContext::new()
                        .with_field_path("patterns")
                        .with_source(Self::NAME),
                ));
            };
            added.push(compile(p)?);
        }
        sync::write(&self.patterns).extend(added);
        Ok(())
    }

    async fn shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BeforeGenerateHook for ContentFilterExtension {
    async fn before_generate(
        &self,
        _ctx: &CancellationToken,
        request: &mut ChatRequest,
    ) -> Result<()> {
        if let Some(pattern) = self.first_match(request) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(model = %request.model, pattern = %pattern, "request blocked by content filter");
            return Err(Error::hook(Self::NAME, "request blocked by content filter"));
        }
        Ok(())
    }
}

impl PriorityProvider for ContentFilterExtension {
    fn priority(&self) -> i32 {
        10
    }
}

impl RouteProvider for ContentFilterExtension {
    fn register_routes(&self, registrar: &mut dyn RouteRegistrar) -> Result<()> {
        let blocked = Arc::clone(&self.blocked);
        registrar.handle_func(
            "GET /extensions/content_filter/stats",
            handler_fn(move |_req| {
                let blocked = blocked.load(Ordering::Relaxed);
                async move {
                    RouteResponse::json(&serde_json::json!({ "blocked": blocked }))
                        .unwrap_or_else(|_| RouteResponse::new(500, "encode failed"))
                }
            }),
        )
    }
}

/// Stamps static tags and a request id onto requests, and echoes them onto responses.
///
/// Honors per-request opt-out. A request may add tags through its `tags` parameter:
/// `{"extension_config": {"request_tag": {"tags": {"team": "search"}}}}`.
pub struct RequestTagExtension {
    tags: RwLock<Metadata>,
}

impl RequestTagExtension {
    pub const NAME: &'static str = "request_tag";
    pub const REQUEST_ID_KEY: &'static str = "request_id";

    pub fn new() -> Self {
        Self {
            tags: RwLock::new(Metadata::new()),
        }
    }

    pub fn with_tag(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        sync::write(&self.tags).insert(key.into(), value.into());
        self
    }

    fn tags_for(&self, request: &ChatRequest) -> Metadata {
        let mut tags = sync::read(&self.tags).clone();
        let cfg = RequestExtensionConfig::resolve(&request.metadata, Self::NAME);
        if let Some(Value::Object(extra)) = cfg.param("tags") {
            for (k, v) in extra {
                tags.insert(k.clone(), v.clone());
            }
        }
        tags
    }
}

impl Default for RequestTagExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for RequestTagExtension {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "tags requests and responses with a request id and static labels"
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }

    fn as_before_generate(&self) -> Option<&dyn BeforeGenerateHook> {
        Some(self)
    }

    fn as_after_generate(&self) -> Option<&dyn AfterGenerateHook> {
        Some(self)
    }
}

#[async_trait]
impl Initializable for RequestTagExtension {
    async fn initialize(&self, config: &Metadata) -> Result<()> {
        if let Some(tags) = config.get_map("tags") {
            let mut current = sync::write(&self.tags);
            for (k, v) in tags {
                current.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BeforeGenerateHook for RequestTagExtension {
    async fn before_generate(
        &self,
        _ctx: &CancellationToken,
        request: &mut ChatRequest,
    ) -> Result<()> {
        let tags = self.tags_for(request);
        for (k, v) in tags {
            request.metadata.entry(k).or_insert(v);
        }
        request
            .metadata
            .entry(Self::REQUEST_ID_KEY.to_string())
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        Ok(())
    }
}

#[async_trait]
impl AfterGenerateHook for RequestTagExtension {
    async fn after_generate(
        &self,
        _ctx: &CancellationToken,
        request: &ChatRequest,
        response: &mut ChatResponse,
    ) -> Result<()> {
        if let Some(id) = request.metadata.get(Self::REQUEST_ID_KEY) {
            response
                .metadata
                .entry(Self::REQUEST_ID_KEY.to_string())
                .or_insert_with(|| id.clone());
        }
        for (k, v) in self.tags_for(request) {
            response.metadata.entry(k).or_insert(v);
        }
        Ok(())
    }
}
