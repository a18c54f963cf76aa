//! Error types for embedding retrieval.

use thiserror::Error;

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while retrieving or caching embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the embedding endpoint
    #[error("Embedding endpoint returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or error message
        message: String,
    },

    /// Response body did not contain a usable embedding
    #[error("Malformed embedding response: {0}")]
    Malformed(String),

    /// API key environment variable not set
    #[error("Missing API key: {var} is not set")]
    MissingApiKey {
        /// Name of the environment variable
        var: &'static str,
    },

    /// Client construction failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding cache error
    #[error("Cache error: {0}")]
    Cache(String),
}

impl EmbeddingError {
    /// Whether retrying the same request may succeed.
    ///
    /// Rate limits (429), server errors (5xx), timeouts and connection
    /// failures are retryable; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) | Self::MissingApiKey { .. } | Self::Config(_) | Self::Cache(_) => {
                false
            }
        }
    }
}

impl From<rusqlite::Error> for EmbeddingError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for EmbeddingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Cache(format!("stored vector is not valid JSON: {err}"))
    }
}
