//! Uniform request and response shapes.

use super::message::Message;
use super::metadata::Metadata;
use super::stream::ChatStream;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat-completion request as seen by every provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Plain prompt, used when `messages` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Every piece of user-visible text in the request, prompt first.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.prompt
            .as_deref()
            .into_iter()
            .chain(self.messages.iter().map(|m| m.content.as_str()))
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One-shot chat response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl ChatResponse {
    pub fn new(
        content: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            provider: provider.into(),
            usage: None,
            metadata: Metadata::new(),
        }
    }

    /// Drain a stream into a single response.
    ///
    /// Content deltas of choice 0 are concatenated, usage is summed across chunks and chunk
    /// metadata is merged (earlier keys win). The stream is closed afterwards.
    pub async fn collect(
        stream: &mut (dyn ChatStream + '_),
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Result<Self> {
        let mut response = ChatResponse::new(String::new(), model, provider);
        let mut usage: Option<Usage> = None;

        let outcome = loop {
            match stream.recv().await {
                Ok(Some(chunk)) => {
                    for choice in chunk.choices.iter().filter(|c| c.index == 0) {
                        response.content.push_str(&choice.delta.content);
                    }
                    if let Some(u) = chunk.usage.as_ref() {
                        usage.get_or_insert_with(Usage::default).accumulate(u);
                    }
                    for (k, v) in chunk.metadata {
                        response.metadata.entry(k).or_insert(v);
                    }
                    if chunk.done {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let closed = stream.close().await;
        outcome?;
        closed?;
        response.usage = usage;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatChunk, ChunkStream};
    use serde_json::json;

    #[test]
    fn test_text_parts_prompt_first() {
        let req = ChatRequest::new("m")
            .with_prompt("p")
            .with_message(Message::user("u"));
        let parts: Vec<&str> = req.text_parts().collect();
        assert_eq!(parts, vec!["p", "u"]);
    }

    #[tokio::test]
    async fn test_collect_concatenates_and_sums_usage() {
        let chunks = vec![
            ChatChunk::text("c1", "Hello").with_usage(Usage::new(3, 1)),
            ChatChunk::text("c1", " World")
                .with_usage(Usage::new(0, 2))
                .with_metadata("k", json!("v")),
            ChatChunk::done("c1"),
        ];
        let mut stream = ChunkStream::from_chunks(chunks);
        let resp = ChatResponse::collect(&mut stream, "gpt", "openai")
            .await
            .unwrap();

        assert_eq!(resp.content, "Hello World");
        assert_eq!(resp.usage, Some(Usage::new(3, 3)));
        assert_eq!(resp.metadata.get("k"), Some(&json!("v")));
        assert_eq!(resp.provider, "openai");
    }
}
