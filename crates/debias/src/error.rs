//! Error types for the debias service.

use debias_embed::EmbeddingError;
use debias_model::ModelError;
use thiserror::Error;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by fitting and debiasing through the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Fitting or applying the model failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Embedding retrieval failed
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] EmbeddingError),

    /// No model has been fitted or installed yet
    #[error("No bias model available; fit or load one first")]
    NoModel,

    /// Another fit is already running
    #[error("A model fit is already in progress")]
    FitInProgress,

    /// Model state lock was poisoned by a panicking writer
    #[error("Model state is unavailable: {0}")]
    State(String),
}

impl ServiceError {
    /// Whether the error is a configuration problem the caller can fix.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Model(e) if e.is_configuration())
    }

    /// Whether the error is a numerical failure of the fit.
    pub const fn is_numerical(&self) -> bool {
        matches!(self, Self::Model(e) if e.is_numerical())
    }

    /// Whether the error came from embedding retrieval.
    pub const fn is_retrieval(&self) -> bool {
        matches!(self, Self::Retrieval(_))
    }
}
