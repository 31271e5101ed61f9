//! Per-request extension settings carried in request metadata.
//!
//! ```json
//! { "extension_config": { "request_tag": { "enabled": false },
//!                         "content_filter": { "strict": true } } }
//! ```
//!
//! Anything malformed degrades to "enabled, no params".

use crate::types::{Metadata, MetadataExt};
use serde_json::{Map, Value};

/// Reserved metadata key.
pub const EXTENSION_CONFIG_KEY: &str = "extension_config";

#[derive(Debug, Clone, PartialEq)]
pub struct RequestExtensionConfig {
    pub enabled: bool,
    /// The entry for this extension, `None` when absent or malformed.
    pub params: Option<Map<String, Value>>,
}

impl Default for RequestExtensionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: None,
        }
    }
}

impl RequestExtensionConfig {
    /// Resolves the settings for `extension` from request metadata.
    pub fn resolve(metadata: &Metadata, extension: &str) -> Self {
        let Some(entry) = metadata
            .get_map(EXTENSION_CONFIG_KEY)
            .and_then(|all| all.get(extension))
            .and_then(Value::as_object)
        else {
            return Self::default();
        };
        let enabled = match entry.get("enabled") {
            Some(Value::Bool(b)) => *b,
            _ => true,
        };
        Self {
            enabled,
            params: Some(entry.clone()),
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }
}

pub fn is_enabled_for_request(metadata: &Metadata, extension: &str) -> bool {
    RequestExtensionConfig::resolve(metadata, extension).enabled
}

/// Writes `{extension: {"enabled": enabled}}` into the reserved key, keeping other entries.
pub fn set_enabled_for_request(metadata: &mut Metadata, extension: &str, enabled: bool) {
    let slot = metadata
        .entry(EXTENSION_CONFIG_KEY.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(all) = slot {
        let entry = all
            .entry(extension.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(e) = entry {
            e.insert("enabled".into(), Value::Bool(enabled));
        }
    }
}
