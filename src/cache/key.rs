//! Cache key generation.

use crate::types::ChatRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub model: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// SHA-256 fingerprint over the parts of a request that change the answer.
///
/// Request metadata is ignored unless listed with [`with_metadata_key`](Self::with_metadata_key),
/// so tracing tags never split the cache.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    include_model: bool,
    include_temperature: bool,
    metadata_keys: Vec<String>,
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self {
            include_model: true,
            include_temperature: true,
            metadata_keys: Vec::new(),
            salt: None,
        }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn with_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_keys.push(key.into());
        self
    }

    pub fn generate(&self, request: &ChatRequest) -> CacheKey {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        if self.include_model {
            parts.insert("model", request.model.clone());
        }
        if self.include_temperature {
            if let Some(t) = request.temperature {
                parts.insert("temperature", format!("{:.2}", t));
            }
        }
        if let Some(max) = request.max_tokens {
            parts.insert("max_tokens", max.to_string());
        }
        if let Some(p) = &request.prompt {
            parts.insert("prompt", p.clone());
        }
        parts.insert(
            "messages",
            serde_json::to_string(&request.messages).unwrap_or_default(),
        );
        for key in &self.metadata_keys {
            if let Some(v) = request.metadata.get(key) {
                parts.insert(key.as_str(), v.to_string());
            }
        }
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.clone());
        }

        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash).with_model(request.model.clone())
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use serde_json::json;

    #[test]
    fn test_same_request_same_key() {
        let g = CacheKeyGenerator::new();
        let a = ChatRequest::new("gpt-4o").with_message(Message::user("hi"));
        let b = a.clone().with_metadata("trace_id", json!("t-1"));
        assert_eq!(g.generate(&a), g.generate(&b));
        assert_eq!(g.generate(&a).as_str().len(), 64);
    }

    #[test]
    fn test_parameters_change_key() {
        let g = CacheKeyGenerator::new();
        let base = ChatRequest::new("gpt-4o").with_prompt("hi");
        assert_ne!(g.generate(&base), g.generate(&base.clone().with_temperature(0.7)));
        assert_ne!(g.generate(&base), g.generate(&ChatRequest::new("other").with_prompt("hi")));
        let salted = CacheKeyGenerator::new().with_salt("tenant-a");
        assert_ne!(g.generate(&base), salted.generate(&base));
    }

    #[test]
    fn test_listed_metadata_key_is_part_of_fingerprint() {
        let g = CacheKeyGenerator::new().with_metadata_key("tenant");
        let a = ChatRequest::new("m").with_metadata("tenant", json!("a"));
        let b = ChatRequest::new("m").with_metadata("tenant", json!("b"));
        assert_ne!(g.generate(&a), g.generate(&b));
    }
}
