//! HTTP route registration for extensions.
//!
//! The gateway core does not run an HTTP server. Extensions describe their endpoints through a
//! [`RouteRegistrar`]; the host application adapts that to its server. [`RouteTable`] is the
//! in-memory registrar used when no server is wired in.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RouteRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RouteResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        let mut resp = Self::new(200, body.into());
        resp.headers
            .insert("content-type".into(), "text/plain; charset=utf-8".into());
        resp
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let mut resp = Self::new(200, serde_json::to_vec(value)?);
        resp.headers
            .insert("content-type".into(), "application/json".into());
        Ok(resp)
    }

    pub fn not_found() -> Self {
        Self::new(404, "not found")
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn serve(&self, request: RouteRequest) -> RouteResponse;
}

pub type HandlerFn = Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, RouteResponse> + Send + Sync>;

/// Wraps an async closure as a [`HandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RouteResponse> + Send + 'static,
{
    Arc::new(move |req| -> BoxFuture<'static, RouteResponse> { Box::pin(f(req)) })
}

struct FnHandler(HandlerFn);

#[async_trait]
impl RouteHandler for FnHandler {
    async fn serve(&self, request: RouteRequest) -> RouteResponse {
        (self.0)(request).await
    }
}

/// Sink for route registrations.
///
/// Patterns are `"[METHOD ]/path"`. A path ending in `/` matches every path below it.
pub trait RouteRegistrar: Send {
    fn handle(&mut self, pattern: &str, handler: Arc<dyn RouteHandler>) -> Result<()>;

    fn handle_func(&mut self, pattern: &str, func: HandlerFn) -> Result<()> {
        self.handle(pattern, Arc::new(FnHandler(func)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    method: Option<String>,
    path: String,
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (method, path) = match raw.split_once(' ') {
            Some((m, p)) => (Some(m.to_uppercase()), p.trim()),
            None => (None, raw),
        };
        if !path.starts_with('/') {
            return Err(Error::validation(format!(
                "route pattern '{}' must start with '/'",
                raw
            )));
        }
        Ok(Self {
            method,
            path: path.to_string(),
        })
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        if let Some(m) = &self.method {
            if !m.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if self.path.ends_with('/') {
            path.starts_with(&self.path)
        } else {
            path == self.path
        }
    }
}

/// In-memory registrar. Exact patterns win over prefixes; longer prefixes win over shorter.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<(Pattern, Arc<dyn RouteHandler>)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|(p, _)| match &p.method {
                Some(m) => format!("{} {}", m, p.path),
                None => p.path.clone(),
            })
            .collect()
    }

    fn lookup(&self, method: &str, path: &str) -> Option<Arc<dyn RouteHandler>> {
        self.routes
            .iter()
            .filter(|(p, _)| p.matches(method, path))
            .max_by_key(|(p, _)| (!p.path.ends_with('/'), p.path.len(), p.method.is_some()))
            .map(|(_, h)| Arc::clone(h))
    }

    pub async fn dispatch(&self, request: RouteRequest) -> RouteResponse {
        match self.lookup(&request.method, &request.path) {
            Some(handler) => handler.serve(request).await,
            None => RouteResponse::not_found(),
        }
    }
}

impl RouteRegistrar for RouteTable {
    fn handle(&mut self, pattern: &str, handler: Arc<dyn RouteHandler>) -> Result<()> {
        let parsed = Pattern::parse(pattern)?;
        if self.routes.iter().any(|(p, _)| *p == parsed) {
            return Err(Error::duplicate("route", pattern));
        }
        self.routes.push((parsed, handler));
        Ok(())
    }
}
