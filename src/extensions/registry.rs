//! Extension registry: name-unique storage, dependency-ordered lifecycle and ordered hook
//! dispatch.

use super::base::{Extension, ExtensionCapability, ExtensionConfig};
use super::request_config::is_enabled_for_request;
use super::routes::RouteRegistrar;
use crate::types::{ChatRequest, ChatResponse, Metadata};
use crate::utils::sync;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, Arc<dyn Extension>>,
    order: Vec<String>,
}

pub struct ExtensionRegistry {
    entries: RwLock<Entries>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn register(&self, extension: Arc<dyn Extension>) -> Result<()> {
        let name = extension.name().to_string();
        let mut entries = sync::write(&self.entries);
        if entries.by_name.contains_key(&name) {
            return Err(Error::duplicate("extension", name));
        }
        tracing::debug!(
            extension = %name,
            version = extension.version(),
            capabilities = ?extension.capabilities(),
            "extension registered"
        );
        entries.by_name.insert(name.clone(), extension);
        entries.order.push(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        sync::read(&self.entries).by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        sync::read(&self.entries).by_name.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        sync::read(&self.entries).order.clone()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.entries).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capabilities(&self, name: &str) -> Option<Vec<ExtensionCapability>> {
        self.get(name).map(|e| e.capabilities())
    }

    fn registered(&self) -> Vec<Arc<dyn Extension>> {
        let entries = sync::read(&self.entries);
        entries
            .order
            .iter()
            .filter_map(|n| entries.by_name.get(n).cloned())
            .collect()
    }

    /// Ascending priority; `sort_by_key` is stable so registration order breaks ties.
    fn by_priority(&self) -> Vec<Arc<dyn Extension>> {
        let mut list = self.registered();
        list.sort_by_key(|e| e.priority());
        list
    }

    /// Dependency-respecting order: DFS post-order over declared dependencies, roots visited
    /// in registration order. Unknown dependencies are ignored and cycles are broken at the
    /// first revisit.
    pub fn initialization_order(&self) -> Vec<String> {
        let entries = sync::read(&self.entries);
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(entries.order.len());
        for name in &entries.order {
            visit(name, &entries.by_name, &mut visited, &mut order);
        }
        order
    }

    /// Initializes every `Initializable` extension that has an enabled entry in `configs`.
    pub async fn initialize(&self, configs: &HashMap<String, ExtensionConfig>) -> Result<()> {
        for name in self.initialization_order() {
            let Some(ext) = self.get(&name) else {
                continue;
            };
            let Some(init) = ext.as_initializable() else {
                continue;
            };
            let config = match configs.get(&name) {
                Some(c) if c.enabled => c,
                _ => {
                    tracing::debug!(extension = %name, "extension not configured, skipping init");
                    continue;
                }
            };
            init.initialize(&config.config).await.map_err(|e| Error::InitFailed {
                name: name.clone(),
                source: Box::new(e),
            })?;
            tracing::info!(extension = %name, "extension initialized");
        }
        Ok(())
    }

    /// Shuts extensions down in reverse registration order, stopping at the first error.
    pub async fn shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        for ext in self.registered().into_iter().rev() {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(init) = ext.as_initializable() {
                init.shutdown(ctx).await?;
                tracing::debug!(extension = ext.name(), "extension shut down");
            }
        }
        Ok(())
    }

    pub async fn run_before_generate(
        &self,
        ctx: &CancellationToken,
        request: &mut ChatRequest,
    ) -> Result<()> {
        for ext in self.by_priority() {
            let Some(hook) = ext.as_before_generate() else {
                continue;
            };
            if !active_for(ext.as_ref(), &request.metadata) {
                continue;
            }
            hook.before_generate(ctx, request)
                .await
                .map_err(|e| hook_failed(ext.name(), "before_generate", e))?;
        }
        Ok(())
    }

    pub async fn run_after_generate(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
        response: &mut ChatResponse,
    ) -> Result<()> {
        for ext in self.by_priority() {
            let Some(hook) = ext.as_after_generate() else {
                continue;
            };
            if !active_for(ext.as_ref(), &request.metadata) {
                continue;
            }
            hook.after_generate(ctx, request, response)
                .await
                .map_err(|e| hook_failed(ext.name(), "after_generate", e))?;
        }
        Ok(())
    }

    pub async fn run_provider_selected(
        &self,
        ctx: &CancellationToken,
        request: &mut ChatRequest,
        provider: &str,
    ) -> Result<()> {
        for ext in self.by_priority() {
            let Some(hook) = ext.as_selection_hook() else {
                continue;
            };
            if !active_for(ext.as_ref(), &request.metadata) {
                continue;
            }
            hook.on_provider_selected(ctx, request, provider)
                .await
                .map_err(|e| hook_failed(ext.name(), "on_provider_selected", e))?;
        }
        Ok(())
    }

    pub async fn run_provider_error(
        &self,
        ctx: &CancellationToken,
        request: &ChatRequest,
        provider: &str,
        error: &Error,
    ) -> Result<()> {
        for ext in self.by_priority() {
            let Some(handler) = ext.as_error_handler() else {
                continue;
            };
            if !active_for(ext.as_ref(), &request.metadata) {
                continue;
            }
            handler
                .on_provider_error(ctx, request, provider, error)
                .await
                .map_err(|e| hook_failed(ext.name(), "on_provider_error", e))?;
        }
        Ok(())
    }

    /// Calls `register_routes` in registration order. The first failure is wrapped with the
    /// extension name.
    pub fn register_routes(&self, registrar: &mut dyn RouteRegistrar) -> Result<()> {
        for ext in self.registered() {
            if let Some(routes) = ext.as_route_provider() {
                routes
                    .register_routes(registrar)
                    .map_err(|e| Error::RouteRegistration {
                        name: ext.name().to_string(),
                        source: Box::new(e),
                    })?;
            }
        }
        Ok(())
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn visit(
    name: &str,
    all: &HashMap<String, Arc<dyn Extension>>,
    visited: &mut HashSet<String>,
    order: &mut Vec<String>,
) {
    let Some(ext) = all.get(name) else {
        return;
    };
    if !visited.insert(name.to_string()) {
        return;
    }
    for dep in ext.dependencies() {
        visit(&dep, all, visited, order);
    }
    order.push(name.to_string());
}

fn active_for(ext: &dyn Extension, metadata: &Metadata) -> bool {
    ext.is_security_critical() || is_enabled_for_request(metadata, ext.name())
}

fn hook_failed(extension: &str, stage: &'static str, error: Error) -> Error {
    tracing::debug!(extension, stage, error = %error, "extension hook failed");
    error
}
