//! Provider contract: identity plus optional capability sets.
//!
//! Every provider implements [`Provider`] (identity). The remaining capabilities are
//! separate traits a provider opts into by overriding the matching `as_*` accessor, so
//! consumers only ask for what they use:
//!
//! | Capability | Trait |
//! |------------|-------|
//! | chat completion | [`ChatProvider`] |
//! | auth / configuration | [`Lifecycle`] |
//! | models and feature flags | [`ModelInventory`] |
//! | health probing | [`HealthChecker`] |
//! | request metrics | [`MetricsReporter`] |

mod metrics;
mod mock;

pub use metrics::{ProviderMetrics, ProviderMetricsTracker};
pub use mock::MockProvider;

use crate::types::{BoxChatStream, ChatRequest, Metadata};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Well-known upstream families. Anything else is `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    Gemini,
    Groq,
    DeepSeek,
    OpenRouter,
    Ollama,
    /// Composition of other providers (load balancer, racing).
    Virtual,
    Mock,
    Custom(String),
}

impl ProviderType {
    pub fn id(&self) -> &str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Gemini => "gemini",
            ProviderType::Groq => "groq",
            ProviderType::DeepSeek => "deepseek",
            ProviderType::OpenRouter => "openrouter",
            ProviderType::Ollama => "ollama",
            ProviderType::Virtual => "virtual",
            ProviderType::Mock => "mock",
            ProviderType::Custom(s) => s.as_str(),
        }
    }
}

impl From<String> for ProviderType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => ProviderType::OpenAI,
            "anthropic" => ProviderType::Anthropic,
            "gemini" => ProviderType::Gemini,
            "groq" => ProviderType::Groq,
            "deepseek" => ProviderType::DeepSeek,
            "openrouter" => ProviderType::OpenRouter,
            "ollama" => ProviderType::Ollama,
            "virtual" => ProviderType::Virtual,
            "mock" => ProviderType::Mock,
            _ => ProviderType::Custom(s),
        }
    }
}

impl From<ProviderType> for String {
    fn from(t: ProviderType) -> Self {
        t.id().to_string()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A `"provider/model"` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelRef {
    provider: String,
    model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Splits on the first `/`. Returns `None` for bare model names.
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// How a provider expects tool definitions to be encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFormat {
    #[default]
    None,
    OpenAi,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_tools: bool,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: provider.into(),
            ..Default::default()
        }
    }
}

/// Static configuration of one provider instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: ProviderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Provider-specific settings.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub options: Metadata,
}

fn default_provider_type() -> ProviderType {
    ProviderType::Custom(String::new())
}

impl Default for ProviderType {
    fn default() -> Self {
        default_provider_type()
    }
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            provider_type,
            ..Default::default()
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    Chat,
    Lifecycle,
    Inventory,
    HealthCheck,
    Metrics,
}

/// Identity every provider exposes, plus accessors for optional capabilities.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn provider_type(&self) -> ProviderType;

    fn description(&self) -> &str {
        ""
    }

    fn as_chat(&self) -> Option<&dyn ChatProvider> {
        None
    }

    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }

    fn as_inventory(&self) -> Option<&dyn ModelInventory> {
        None
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }

    fn as_metrics_reporter(&self) -> Option<&dyn MetricsReporter> {
        None
    }

    fn capabilities(&self) -> Vec<ProviderCapability> {
        let mut caps = Vec::new();
        if self.as_chat().is_some() {
            caps.push(ProviderCapability::Chat);
        }
        if self.as_lifecycle().is_some() {
            caps.push(ProviderCapability::Lifecycle);
        }
        if self.as_inventory().is_some() {
            caps.push(ProviderCapability::Inventory);
        }
        if self.as_health_checker().is_some() {
            caps.push(ProviderCapability::HealthCheck);
        }
        if self.as_metrics_reporter().is_some() {
            caps.push(ProviderCapability::Metrics);
        }
        caps
    }
}

pub type SharedProvider = Arc<dyn Provider>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Starts a completion. Non-streaming callers collect the stream with
    /// [`ChatResponse::collect`](crate::types::ChatResponse::collect).
    async fn generate_chat_completion(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<BoxChatStream>;
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn authenticate(&self, ctx: &CancellationToken) -> Result<()>;

    fn is_authenticated(&self) -> bool;

    async fn logout(&self, ctx: &CancellationToken) -> Result<()>;

    fn configure(&self, config: ProviderConfig) -> Result<()>;

    fn config(&self) -> ProviderConfig;
}

#[async_trait]
pub trait ModelInventory: Send + Sync {
    async fn list_models(&self, ctx: &CancellationToken) -> Result<Vec<ModelInfo>>;

    fn default_model(&self) -> String;

    fn supports_tool_calling(&self) -> bool {
        false
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn supports_responses_api(&self) -> bool {
        false
    }

    fn tool_format(&self) -> ToolFormat {
        ToolFormat::None
    }
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn health_check(&self, ctx: &CancellationToken) -> Result<()>;
}

pub trait MetricsReporter: Send + Sync {
    fn metrics(&self) -> ProviderMetrics;
}
