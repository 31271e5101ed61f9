//! Error categorisation shared by the hub and the stream wrapper.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    Authentication,
    InvalidRequest,
    ServerError,
    Network,
    Unknown,
}

const NETWORK: &[&str] = &["connection", "network", "timeout", "dial"];
const RATE_LIMIT: &[&str] = &["rate limit", "too many requests", "429"];
const AUTHENTICATION: &[&str] = &["unauthorized", "auth", "401", "403"];
const SERVER_ERROR: &[&str] = &["500", "502", "503", "504", "server error"];
const INVALID_REQUEST: &[&str] = &["invalid", "bad request", "400"];

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Keyword scan over an error message, first matching group wins.
    pub fn from_message(message: &str) -> Self {
        let m = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| m.contains(w));
        if has(NETWORK) {
            ErrorCategory::Network
        } else if has(RATE_LIMIT) {
            ErrorCategory::RateLimit
        } else if has(AUTHENTICATION) {
            ErrorCategory::Authentication
        } else if has(SERVER_ERROR) {
            ErrorCategory::ServerError
        } else if has(INVALID_REQUEST) {
            ErrorCategory::InvalidRequest
        } else {
            ErrorCategory::Unknown
        }
    }

    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(ErrorCategory::RateLimit),
            401 | 403 => Some(ErrorCategory::Authentication),
            408 => Some(ErrorCategory::Timeout),
            400..=499 => Some(ErrorCategory::InvalidRequest),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => None,
        }
    }

    /// Parses a category name as produced by [`ErrorCategory::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rate_limit" => Some(ErrorCategory::RateLimit),
            "timeout" => Some(ErrorCategory::Timeout),
            "authentication" => Some(ErrorCategory::Authentication),
            "invalid_request" => Some(ErrorCategory::InvalidRequest),
            "server_error" => Some(ErrorCategory::ServerError),
            "network" => Some(ErrorCategory::Network),
            "unknown" => Some(ErrorCategory::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
