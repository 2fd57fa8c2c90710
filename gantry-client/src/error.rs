//! Error types for the control-plane client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the control plane
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Token exchange or assertion signing failed
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// The connection-data document lacks a required service
    #[error("Service {0} is not offered by this tenant")]
    MissingService(String),

    /// Failed to decode a response body
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A URL could not be parsed or built
    #[error("Invalid URL: {0}")]
    Url(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// True when the server rejected the bearer token; the caller should
    /// re-authorize once and retry.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 401, .. })
    }
}
