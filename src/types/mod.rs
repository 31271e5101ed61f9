//! Core data types shared by providers, extensions, interceptors and metrics.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChatRequest`] | Uniform chat-completion request |
//! | [`ChatResponse`] | One-shot response (non-streaming callers) |
//! | [`ChatChunk`] | One streaming element with delta, usage and `done` flag |
//! | [`ChatStream`] | Single-consumer async chunk source with idempotent close |
//! | [`Metadata`] | `String -> serde_json::Value` map with forgiving typed getters |

pub mod chunk;
pub mod message;
pub mod metadata;
pub mod request;
pub mod stream;

pub use chunk::{ChatChunk, ChunkChoice, ChunkDelta};
pub use message::{Message, MessageRole};
pub use metadata::{Metadata, MetadataExt};
pub use request::{ChatRequest, ChatResponse, Usage};
pub use stream::{into_chunk_stream, BoxChatStream, ChatStream, ChunkStream};
