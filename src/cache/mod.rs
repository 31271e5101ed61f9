//! Response caching backends used by the cache interceptor.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheBackend`] | Trait for implementing custom cache backends |
//! | [`MemoryCache`] | In-memory LRU cache with per-entry TTL |
//! | [`NullCache`] | No-op cache for disabling caching |
//! | [`CacheKeyGenerator`] | SHA-256 fingerprint of a [`ChatRequest`](crate::types::ChatRequest) |

mod backend;
mod key;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use key::{CacheKey, CacheKeyGenerator};
