#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/debias/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod pipeline;
pub mod service;

// Re-export sub-crates
pub use debias_embed as embed;
pub use debias_model as model;
pub use debias_output as output;

// Re-export main types
pub use error::{Result, ServiceError};
pub use pipeline::{
    DEFAULT_EMBEDDING_MODEL, FactorPipelineFit, PipelineConfig, fit_factor_model, fit_transfer_model,
    transfer_report,
};
pub use service::{DebiasRequest, DebiasService, FitGuard};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
