//! HTTP plumbing shared by provider adapters.

mod http;
pub mod retry;

pub use http::{
    HeaderInterceptor, HttpClient, HttpConfig, HttpStats, RequestInterceptor,
    ResponseInterceptor, DEFAULT_HTTP_TIMEOUT,
};
pub use retry::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Other(String),
}
