#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/debias/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod estimator;
pub mod evaluation;
pub mod factor;
pub mod linalg;
pub mod selection;
pub mod transfer;
pub mod transform;
pub mod types;

// Re-export main types
pub use error::{ModelError, Result};
pub use estimator::{AdamConfig, AdamState, BiasEstimator, BiasFit, BiasObjective, EpochLoss, EstimatorConfig};
pub use evaluation::{EvaluationReport, ItemEvaluation, evaluate};
pub use factor::{FactorConfig, FactorExtractor, FactorFit, FactorModel};
pub use selection::{ComponentSelection, ComponentSelector, SelectorConfig};
pub use transfer::{SourceData, SourceWeighting, TransferBiasEstimator, TransferConfig, weighted_ridge};
pub use transform::{BiasModel, DebiasTransform, shift_responses};
pub use types::{CalibrationItem, CalibrationSet, DebiasedResult, NewQuestionItem};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
