use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "metrics.histogram_capacity")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "stream_wrapper", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the gateway core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error("metrics collector is closed")]
    Closed,

    #[error("{kind} '{name}' is already registered")]
    Duplicate { kind: &'static str, name: String },

    #[error("extension '{name}' failed to initialize: {source}")]
    InitFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("extension '{name}' failed to register routes: {source}")]
    RouteRegistration {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("provider '{provider}' does not support chat completion")]
    Incompatible { provider: String },

    #[error("provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        status: Option<u16>,
        payload: Option<serde_json::Value>,
    },

    #[error("hook '{name}' rejected the request: {message}")]
    Hook { name: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Upstream failure without an HTTP status or payload.
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: msg.into(),
            status: None,
            payload: None,
        }
    }

    pub fn hook(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Hook {
            name: name.into(),
            message: msg.into(),
        }
    }

    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Error::Duplicate {
            kind,
            name: name.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Provider { status, .. } => *status,
            Error::Transport(TransportError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. } | Error::Configuration { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_rendered_in_message() {
        let err = Error::validation_with_context(
            "stream is required",
            ErrorContext::new()
                .with_field_path("stream")
                .with_source("stream_wrapper"),
        );
        assert_eq!(
            err.to_string(),
            "Validation error: stream is required (field: stream, source: stream_wrapper)"
        );
        assert_eq!(err.context().unwrap().source.as_deref(), Some("stream_wrapper"));
    }

    #[test]
    fn test_init_failed_keeps_cause() {
        let err = Error::InitFailed {
            name: "auth".into(),
            source: Box::new(Error::hook("auth", "missing key")),
        };
        assert!(err.to_string().contains("auth"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_status_code_from_provider_error() {
        let err = Error::Provider {
            provider: "openai".into(),
            message: "overloaded".into(),
            status: Some(503),
            payload: None,
        };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(Error::Closed.status_code(), None);
    }
}
