//! Error types for the post cache and its backend client.

use thiserror::Error;

/// Errors that can occur when fetching, mutating or subscribing.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No bearer token is available, or the backend rejected it.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status.
    #[error("request failed ({status}): {message}")]
    Api { status: u16, message: String },

    /// Configured base URL cannot carry endpoint paths.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    /// Response body did not have the expected envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Post is not present in the local store.
    #[error("post not found: {id}")]
    NotFound { id: String },

    /// The poll on this post was already voted on.
    #[error("already voted on post {id}")]
    AlreadyVoted { id: String },

    /// Push transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl CacheError {
    /// Whether the error happened locally, before any request was issued.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CacheError::NotFound { .. } | CacheError::AlreadyVoted { .. }
        ) || matches!(self, CacheError::Auth(msg) if msg == crate::client::NOT_AUTHENTICATED)
    }
}
