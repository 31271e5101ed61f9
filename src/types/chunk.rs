//! Streaming chunk model.

use super::message::MessageRole;
use super::metadata::Metadata;
use super::request::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element of a streaming completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default)]
    pub content: String,
}

impl ChatChunk {
    /// Single-choice assistant delta.
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some(MessageRole::Assistant),
                    content: content.into(),
                },
            }],
            ..Default::default()
        }
    }

    /// Terminal chunk without content.
    pub fn done(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            done: true,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Adds a metadata key unless it is already present.
    pub fn tag(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    /// Byte length of all delta content in the chunk.
    pub fn content_len(&self) -> usize {
        self.choices.iter().map(|c| c.delta.content.len()).sum()
    }

    /// Content of the first choice, or an empty string.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.delta.content.as_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_never_overwrites() {
        let mut chunk = ChatChunk::text("1", "hi").with_metadata("loadbalance_provider", json!("a"));
        chunk.tag("loadbalance_provider", "b");
        chunk.tag("racing_winner", "c");
        assert_eq!(chunk.metadata["loadbalance_provider"], json!("a"));
        assert_eq!(chunk.metadata["racing_winner"], json!("c"));
    }

    #[test]
    fn test_chunk_json_shape() {
        let chunk = ChatChunk::text("abc", "Hello").with_usage(Usage::new(1, 2));
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["choices"][0]["delta"]["content"], "Hello");
        assert_eq!(v["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(v["usage"]["total_tokens"], 3);
        assert!(v.get("metadata").is_none());
    }
}
