//! # ai-lib-gateway
//!
//! Request-execution core of a multi-provider AI inference gateway.
//!
//! ## Overview
//!
//! A chat request enters the [`gateway::Gateway`], passes the extension hooks, is routed to a
//! provider (possibly a virtual one that load-balances or races several upstreams), travels
//! through the interceptor chain and comes back as a stream of chunks. Every step emits
//! [`metrics::MetricEvent`]s into a non-blocking hub that keeps aggregate, per-provider and
//! per-model statistics and fans events out to subscribers and hooks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_gateway::gateway::Gateway;
//! use ai_lib_gateway::provider::MockProvider;
//! use ai_lib_gateway::types::ChatRequest;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_gateway::Result<()> {
//!     ai_lib_gateway::logging::init_logging("info");
//!     let gateway = Gateway::builder()
//!         .with_provider(Arc::new(MockProvider::new("mock")))
//!         .build()?;
//!
//!     let ctx = CancellationToken::new();
//!     let response = gateway
//!         .generate(&ctx, ChatRequest::new("mock/any").with_prompt("hi"))
//!         .await?;
//!     println!("{}", response.content);
//!     println!("{:?}", gateway.collector().snapshot().success_rate);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`gateway`] | Orchestrates hooks, provider resolution, interceptors and metrics |
//! | [`provider`] | Provider identity and optional capability traits |
//! | [`virtual_providers`] | Load balancer and racing compositions |
//! | [`extensions`] | Extension registry, lifecycle, hooks and routes |
//! | [`interceptors`] | Around-advice chain for the provider call |
//! | [`metrics`] | Event hub, histograms, subscriptions, hooks, stream wrapper |
//! | [`transport`] | HTTP client with retry and backoff |
//! | [`cache`] | Response cache backends |
//! | [`tokens`] | Token estimation and cost calculation |
//! | [`types`] | Requests, responses, chunks and streams |
//! | [`config`] | YAML / JSON gateway configuration |
//! | [`logging`] | `tracing` subscriber setup |

pub mod cache;
pub mod config;
pub mod extensions;
pub mod gateway;
pub mod interceptors;
pub mod logging;
pub mod metrics;
pub mod provider;
pub mod tokens;
pub mod transport;
pub mod types;
pub mod virtual_providers;

mod utils;

pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder};
pub use metrics::{MetricEvent, MetricsCollector, MetricsSnapshot, MetricsStream};
pub use provider::{Provider, SharedProvider};
pub use types::{ChatChunk, ChatRequest, ChatResponse, ChatStream};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of `Result<T>`.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
