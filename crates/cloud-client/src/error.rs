//! Cloud client errors

use thiserror::Error;

/// Errors that can occur when interacting with the provider API
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider API returned an error
    #[error("Cloud API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, expired, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request rate exceeded
    #[error("Throttled: {0}")]
    Throttled(String),
}

impl CloudError {
    /// The target of the call does not exist (already released, detached, deleted...)
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    /// Worth retrying without operator action
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Http(_) | CloudError::Api(_) | CloudError::Throttled(_))
    }
}
