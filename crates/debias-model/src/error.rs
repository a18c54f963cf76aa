//! Error types for model fitting and inference.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while fitting or applying a bias model.
///
/// Variants fall into two families: configuration errors (bad
/// hyperparameters, too little calibration data, mismatched shapes) and
/// numerical errors (non-finite values, singular systems, degenerate factor
/// fits). Use [`ModelError::is_configuration`] and
/// [`ModelError::is_numerical`] to branch on the family.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid hyperparameter or input layout
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Not enough calibration rows for the requested fit
    #[error("Insufficient data: need at least {required} items, got {actual}")]
    InsufficientData {
        /// Required number of items
        required: usize,
        /// Actual number of items
        actual: usize,
    },

    /// Vector or matrix dimension does not match the model
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Ill-conditioned matrix, non-finite value, or degenerate factor fit
    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl ModelError {
    /// Whether the error stems from configuration or input shape.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InsufficientData { .. } | Self::DimensionMismatch { .. }
        )
    }

    /// Whether the error stems from the numerics of the fit.
    pub const fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical(_))
    }

    pub(crate) fn non_finite(context: &str) -> Self {
        Self::Numerical(format!("{context} contains non-finite values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_families() {
        assert!(ModelError::Configuration("x".into()).is_configuration());
        assert!(
            ModelError::InsufficientData {
                required: 3,
                actual: 1
            }
            .is_configuration()
        );
        assert!(ModelError::non_finite("scores").is_numerical());
        assert!(!ModelError::non_finite("scores").is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = ModelError::DimensionMismatch {
            expected: 8,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 8, got 4");
    }
}
