/*
[INPUT]:  Error sources (WebSocket transport, serialization, URL, config)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error types for the feed crates
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

/// Main error type for the ticker feed
#[derive(Error, Debug)]
pub enum FeedError {
    /// WebSocket transport failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Frame could not be decoded into a known message
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection attempt did not open in time
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection already closed
    #[error("Connection closed")]
    Closed,
}

impl FeedError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::WebSocket(_) | FeedError::Timeout { .. } | FeedError::Closed
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocket(err.to_string())
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;
