//! Extension identity and capability traits.

use super::routes::RouteRegistrar;
use crate::types::{ChatRequest, ChatResponse, Metadata};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Priority of extensions that do not declare one. Lower runs earlier.
pub const DEFAULT_PRIORITY: i32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionCapability {
    Initializable,
    BeforeGenerate,
    AfterGenerate,
    ProviderError,
    ProviderSelection,
    Routes,
    Dependencies,
    Priority,
}

/// A named, versioned plugin.
///
/// Only identity is mandatory. Capabilities are opted into by returning `Some(self)` from
/// the matching `as_*` accessor, the same way providers expose theirs.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Security-critical extensions run even when a request disables them.
    fn is_security_critical(&self) -> bool {
        false
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        None
    }

    fn as_before_generate(&self) -> Option<&dyn BeforeGenerateHook> {
        None
    }

    fn as_after_generate(&self) -> Option<&dyn AfterGenerateHook> {
        None
    }

    fn as_error_handler(&self) -> Option<&dyn ProviderErrorHandler> {
        None
    }

    fn as_selection_hook(&self) -> Option<&dyn ProviderSelectionHook> {
        None
    }

    fn as_route_provider(&self) -> Option<&dyn RouteProvider> {
        None
    }

    fn as_dependency_declarer(&self) -> Option<&dyn DependencyDeclarer> {
        None
    }

    fn as_priority_provider(&self) -> Option<&dyn PriorityProvider> {
        None
    }

    fn priority(&self) -> i32 {
        self.as_priority_provider()
            .map(|p| p.priority())
            .unwrap_or(DEFAULT_PRIORITY)
    }

    fn dependencies(&self) -> Vec<String> {
        self.as_dependency_declarer()
            .map(|d| d.dependencies())
            .unwrap_or_default()
    }

    fn capabilities(&self) -> Vec<ExtensionCapability> {
        let checks = [
            (self.as_initializable().is_some(), ExtensionCapability::Initializable),
            (self.as_before_generate().is_some(), ExtensionCapability::BeforeGenerate),
            (self.as_after_generate().is_some(), ExtensionCapability::AfterGenerate),
            (self.as_error_handler().is_some(), ExtensionCapability::ProviderError),
            (self.as_selection_hook().is_some(), ExtensionCapability::ProviderSelection),
            (self.as_route_provider().is_some(), ExtensionCapability::Routes),
            (self.as_dependency_declarer().is_some(), ExtensionCapability::Dependencies),
            (self.as_priority_provider().is_some(), ExtensionCapability::Priority),
        ];
        checks
            .into_iter()
            .filter_map(|(present, cap)| present.then_some(cap))
            .collect()
    }
}

#[async_trait]
pub trait Initializable: Send + Sync {
    async fn initialize(&self, config: &Metadata) -> Result<()>;

    async fn shutdown(&self, ctx: &CancellationToken) -> Result<()>;
}

#[async_trait]
pub trait BeforeGenerateHook: Send + Sync {
    /// May rewrite the request. An error aborts the call.
    async fn before_generate(&self, ctx: &CancellationToken, request: &mut ChatRequest)
        -> Result<()>;
}

#[async_trait]
pub trait AfterGenerateHook: Send + Sync {
    async fn after_generate(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
        response: &mut ChatResponse,
    ) -> Result<()>;
}

#[async_trait]
pub trait ProviderErrorHandler: Send + Sync {
    async fn on_provider_error(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
        provider: &str,
        error: &Error,
    ) -> Result<()>;
}

#[async_trait]
pub trait ProviderSelectionHook: Send + Sync {
    async fn on_provider_selected(
        &self,
        ctx: &CancellationToken,
        request: &mut ChatRequest,
        provider: &str,
    ) -> Result<()>;
}

pub trait RouteProvider: Send + Sync {
    fn register_routes(&self, registrar: &mut dyn RouteRegistrar) -> Result<()>;
}

pub trait DependencyDeclarer: Send + Sync {
    /// Names of extensions that must be initialized first.
    fn dependencies(&self) -> Vec<String>;
}

pub trait PriorityProvider: Send + Sync {
    fn priority(&self) -> i32;
}

/// Static configuration for one extension, as passed to
/// [`ExtensionRegistry::initialize`](super::ExtensionRegistry::initialize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Metadata,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config: Metadata::new(),
        }
    }
}

impl ExtensionConfig {
    pub fn enabled() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: Metadata::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}
